//! Conductor plan schema and validation.
//!
//! The Conductor agent emits a JSON plan; the dispatcher only ever executes a
//! plan that passed [`ConductorPlan::validate`]. Invalid plans trigger the
//! fallback chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on actions per cycle.
pub const MAX_PLAN_ACTIONS: usize = 6;

const MAX_REASONING_CHARS: usize = 2000;
const MAX_NOTES_CHARS: usize = 1000;

/// One planned action (closed vocabulary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    FetchNews,
    Propose,
    Debate,
    PickAndExecute { issue_number: u64 },
    Director,
    StrategicDirector,
    ResearchScout,
    Cooldown { seconds: u64 },
    Halt,
    FileIssue { title: String, description: String },
    SkipCycle,
}

impl Action {
    /// Stable action name used in telemetry phase records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchNews => "fetch_news",
            Self::Propose => "propose",
            Self::Debate => "debate",
            Self::PickAndExecute { .. } => "pick_and_execute",
            Self::Director => "director",
            Self::StrategicDirector => "strategic_director",
            Self::ResearchScout => "research_scout",
            Self::Cooldown { .. } => "cooldown",
            Self::Halt => "halt",
            Self::FileIssue { .. } => "file_issue",
            Self::SkipCycle => "skip_cycle",
        }
    }

    /// Read-only actions still run in dry-run mode; everything else is
    /// logged and skipped.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Cooldown { .. } | Self::Halt | Self::SkipCycle)
    }
}

/// Why a plan was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("plan has {0} actions (max {MAX_PLAN_ACTIONS})")]
    TooManyActions(usize),
    #[error("file_issue action has an empty {0}")]
    EmptyField(&'static str),
    #[error("cooldown of {0}s exceeds the one-hour bound")]
    CooldownTooLong(u64),
}

/// Structured output of the Conductor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorPlan {
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub suggested_cooldown_seconds: u64,
    #[serde(default)]
    pub notes_for_next_cycle: String,
}

impl ConductorPlan {
    /// Validate bounds; truncates over-long free-text fields in place rather
    /// than rejecting them.
    pub fn validate(&mut self) -> Result<(), PlanValidationError> {
        if self.actions.len() > MAX_PLAN_ACTIONS {
            return Err(PlanValidationError::TooManyActions(self.actions.len()));
        }
        for action in &self.actions {
            match action {
                Action::FileIssue { title, description } => {
                    if title.trim().is_empty() {
                        return Err(PlanValidationError::EmptyField("title"));
                    }
                    if description.trim().is_empty() {
                        return Err(PlanValidationError::EmptyField("description"));
                    }
                }
                Action::Cooldown { seconds } if *seconds > 3600 => {
                    return Err(PlanValidationError::CooldownTooLong(*seconds));
                }
                _ => {}
            }
        }
        truncate_chars(&mut self.reasoning, MAX_REASONING_CHARS);
        truncate_chars(&mut self.notes_for_next_cycle, MAX_NOTES_CHARS);
        Ok(())
    }

    /// Action names in plan order, for the telemetry record.
    pub fn action_names(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.name().to_string()).collect()
    }
}

fn truncate_chars(s: &mut String, max: usize) {
    if s.chars().count() > max {
        *s = s.chars().take(max).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(Action::FetchNews.name(), "fetch_news");
        assert_eq!(
            Action::PickAndExecute { issue_number: 3 }.name(),
            "pick_and_execute"
        );
        assert_eq!(Action::Cooldown { seconds: 60 }.name(), "cooldown");
    }

    #[test]
    fn test_plan_parses_from_tagged_json() {
        let json = r#"{
            "reasoning": "backlog has an analysis task",
            "actions": [
                {"action": "fetch_news"},
                {"action": "pick_and_execute", "issue_number": 12},
                {"action": "cooldown", "seconds": 120}
            ],
            "suggested_cooldown_seconds": 120,
            "notes_for_next_cycle": "watch issue 12"
        }"#;
        let mut plan: ConductorPlan = serde_json::from_str(json).unwrap();
        plan.validate().unwrap();
        assert_eq!(plan.actions.len(), 3);
        assert_eq!(
            plan.actions[1],
            Action::PickAndExecute { issue_number: 12 }
        );
    }

    #[test]
    fn test_plan_rejects_unknown_action() {
        let json = r#"{"actions": [{"action": "reboot_universe"}]}"#;
        assert!(serde_json::from_str::<ConductorPlan>(json).is_err());
    }

    #[test]
    fn test_plan_rejects_missing_required_field() {
        // pick_and_execute requires issue_number
        let json = r#"{"actions": [{"action": "pick_and_execute"}]}"#;
        assert!(serde_json::from_str::<ConductorPlan>(json).is_err());
    }

    #[test]
    fn test_plan_rejects_too_many_actions() {
        let mut plan = ConductorPlan {
            actions: vec![Action::SkipCycle; 7],
            ..Default::default()
        };
        assert_eq!(
            plan.validate(),
            Err(PlanValidationError::TooManyActions(7))
        );
    }

    #[test]
    fn test_plan_rejects_empty_file_issue_title() {
        let mut plan = ConductorPlan {
            actions: vec![Action::FileIssue {
                title: "  ".to_string(),
                description: "d".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(plan.validate(), Err(PlanValidationError::EmptyField("title")));
    }

    #[test]
    fn test_plan_truncates_long_reasoning() {
        let mut plan = ConductorPlan {
            reasoning: "x".repeat(5000),
            actions: vec![Action::SkipCycle],
            ..Default::default()
        };
        plan.validate().unwrap();
        assert_eq!(plan.reasoning.len(), 2000);
    }
}
