//! Transient views of tracker records (issues, pull requests, CI runs).
//!
//! The tracker owns identity; the engine never caches these across cycles.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::IssueState;

/// An issue as seen by the engine at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default = "default_open")]
    pub open: bool,
    pub created_at: DateTime<Utc>,
}

fn default_open() -> bool {
    true
}

impl Issue {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Lifecycle state derived from the lifecycle label, if present.
    pub fn state(&self) -> Option<IssueState> {
        self.labels.iter().find_map(|l| IssueState::from_label(l))
    }
}

/// PR state as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// CI check status for a PR branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Pending,
}

/// A pull request as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub branch: String,
    pub state: PrState,
    #[serde(default)]
    pub review_comments: Vec<String>,
    #[serde(default = "default_pending")]
    pub check_status: CheckStatus,
    #[serde(default)]
    pub body: String,
}

fn default_pending() -> CheckStatus {
    CheckStatus::Pending
}

impl PullRequest {
    /// The issue this PR closes, from the `Closes #N` token in its body.
    pub fn linked_issue(&self) -> Option<u64> {
        linked_issue_in(&self.body)
    }
}

/// Extract the first `Closes #N` / `Fixes #N` / `Resolves #N` token.
pub fn linked_issue_in(body: &str) -> Option<u64> {
    let lower = body.to_lowercase();
    for keyword in ["closes #", "fixes #", "resolves #"] {
        if let Some(pos) = lower.find(keyword) {
            let digits: String = lower[pos + keyword.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(n) = digits.parse() {
                return Some(n);
            }
        }
    }
    None
}

/// One CI run on the main branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiRun {
    pub id: String,
    /// "success", "failure", or empty when still in progress
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub completed: bool,
}
