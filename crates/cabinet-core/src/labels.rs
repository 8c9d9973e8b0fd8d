//! Label vocabulary and the issue lifecycle state machine.
//!
//! Labels are the coordination substrate: the engine never infers state from
//! comment text, only from this closed label set. The `self-improve:*` group
//! is mutually exclusive and maps 1:1 onto [`IssueState`].

use serde::{Deserialize, Serialize};

// Lifecycle labels (mutually exclusive within this group)
pub const LABEL_PROPOSED: &str = "self-improve:proposed";
pub const LABEL_BACKLOG: &str = "self-improve:backlog";
pub const LABEL_IN_PROGRESS: &str = "self-improve:in-progress";
pub const LABEL_DONE: &str = "self-improve:done";
pub const LABEL_FAILED: &str = "self-improve:failed";
pub const LABEL_REJECTED: &str = "self-improve:rejected";

// Task routing
pub const LABEL_TASK_ANALYSIS: &str = "task:analysis";
pub const LABEL_TASK_CODE: &str = "task:code-change";

// Orthogonal labels
pub const LABEL_HUMAN: &str = "human-suggestion";
pub const LABEL_DIRECTOR: &str = "director-suggestion";
pub const LABEL_STRATEGY: &str = "strategy-suggestion";
pub const LABEL_RESEARCH_SCOUT: &str = "research-scout";
pub const LABEL_EDITORIAL: &str = "editorial-quality";
pub const LABEL_GAP_CONTENT: &str = "gap:content";
pub const LABEL_GAP_TECHNICAL: &str = "gap:technical";
pub const LABEL_PRIORITY_CRITICAL: &str = "priority:critical";
pub const LABEL_PRIORITY_HIGH: &str = "priority:high";
pub const LABEL_PRIORITY_MEDIUM: &str = "priority:medium";
pub const LABEL_PRIORITY_LOW: &str = "priority:low";

/// The full closed label vocabulary with tracker colors, used for idempotent
/// label creation at cycle start.
pub const ALL_LABELS: &[(&str, &str)] = &[
    (LABEL_PROPOSED, "808080"),
    (LABEL_BACKLOG, "0e8a16"),
    (LABEL_IN_PROGRESS, "fbca04"),
    (LABEL_DONE, "6f42c1"),
    (LABEL_FAILED, "d73a4a"),
    (LABEL_REJECTED, "e67e22"),
    (LABEL_TASK_ANALYSIS, "1d76db"),
    (LABEL_TASK_CODE, "5319e7"),
    (LABEL_HUMAN, "0075ca"),
    (LABEL_DIRECTOR, "d876e3"),
    (LABEL_STRATEGY, "f9a825"),
    (LABEL_RESEARCH_SCOUT, "40e0d0"),
    (LABEL_EDITORIAL, "c5def5"),
    (LABEL_GAP_CONTENT, "c2e0c6"),
    (LABEL_GAP_TECHNICAL, "d4c5f9"),
    (LABEL_PRIORITY_CRITICAL, "e11d48"),
    (LABEL_PRIORITY_HIGH, "b60205"),
    (LABEL_PRIORITY_MEDIUM, "fbca04"),
    (LABEL_PRIORITY_LOW, "c2e0c6"),
];

/// Issue lifecycle state, derived from and translated to lifecycle labels at
/// the tracker boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Proposed,
    Backlog,
    InProgress,
    Done,
    Failed,
    Rejected,
}

impl IssueState {
    /// The lifecycle label carrying this state.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proposed => LABEL_PROPOSED,
            Self::Backlog => LABEL_BACKLOG,
            Self::InProgress => LABEL_IN_PROGRESS,
            Self::Done => LABEL_DONE,
            Self::Failed => LABEL_FAILED,
            Self::Rejected => LABEL_REJECTED,
        }
    }

    /// Parse a lifecycle label back into a state.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            LABEL_PROPOSED => Some(Self::Proposed),
            LABEL_BACKLOG => Some(Self::Backlog),
            LABEL_IN_PROGRESS => Some(Self::InProgress),
            LABEL_DONE => Some(Self::Done),
            LABEL_FAILED => Some(Self::Failed),
            LABEL_REJECTED => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Terminal states are sticky: no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Rejected)
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: IssueState) -> bool {
        use IssueState::*;
        matches!(
            (self, next),
            (Proposed, Backlog)
                | (Proposed, Rejected)
                | (Backlog, InProgress)
                | (InProgress, Done)
                | (InProgress, Failed)
        )
    }
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proposed => write!(f, "proposed"),
            Self::Backlog => write!(f, "backlog"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        for state in [
            IssueState::Proposed,
            IssueState::Backlog,
            IssueState::InProgress,
            IssueState::Done,
            IssueState::Failed,
            IssueState::Rejected,
        ] {
            assert_eq!(IssueState::from_label(state.label()), Some(state));
        }
        assert_eq!(IssueState::from_label("task:analysis"), None);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        for terminal in [IssueState::Done, IssueState::Failed, IssueState::Rejected] {
            assert!(terminal.is_terminal());
            for next in [
                IssueState::Proposed,
                IssueState::Backlog,
                IssueState::InProgress,
                IssueState::Done,
                IssueState::Failed,
                IssueState::Rejected,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_legal_transitions() {
        assert!(IssueState::Proposed.can_transition_to(IssueState::Backlog));
        assert!(IssueState::Proposed.can_transition_to(IssueState::Rejected));
        assert!(IssueState::Backlog.can_transition_to(IssueState::InProgress));
        assert!(IssueState::InProgress.can_transition_to(IssueState::Done));
        assert!(IssueState::InProgress.can_transition_to(IssueState::Failed));
        assert!(!IssueState::Backlog.can_transition_to(IssueState::Done));
        assert!(!IssueState::Proposed.can_transition_to(IssueState::InProgress));
    }

    #[test]
    fn test_every_lifecycle_label_is_in_vocabulary() {
        let names: Vec<&str> = ALL_LABELS.iter().map(|(name, _)| *name).collect();
        for state in [
            IssueState::Proposed,
            IssueState::Backlog,
            IssueState::InProgress,
            IssueState::Done,
            IssueState::Failed,
            IssueState::Rejected,
        ] {
            assert!(names.contains(&state.label()));
        }
    }
}
