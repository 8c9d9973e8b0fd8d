//! Pull request and branch operations.

use cabinet_core::{CabinetError, CheckStatus, PrState, PullRequest, Result};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::command::GhExecutor;
use crate::retry::exec_with_retry;

/// Fields requested for single-PR views; includes the check rollup so the
/// workflow can gate on branch checks.
const PR_VIEW_FIELDS: &str = "number,headRefName,state,body,statusCheckRollup";
/// Fields for PR listings, where check status is not consumed.
const PR_LIST_FIELDS: &str = "number,headRefName,state,body";

/// Wire shape of `gh pr view --json` output.
#[derive(Debug, Deserialize)]
struct RawPr {
    number: u64,
    #[serde(rename = "headRefName", default)]
    branch: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    body: String,
    #[serde(rename = "statusCheckRollup", default)]
    status_check_rollup: Vec<RawCheck>,
}

/// One node of the status check rollup. Check runs report `status` and
/// `conclusion`; classic status contexts report `state`.
#[derive(Debug, Deserialize)]
struct RawCheck {
    #[serde(default)]
    status: String,
    #[serde(default)]
    conclusion: String,
    #[serde(default)]
    state: String,
}

impl RawCheck {
    fn outcome(&self) -> CheckStatus {
        if !self.status.is_empty() && !self.status.eq_ignore_ascii_case("completed") {
            return CheckStatus::Pending;
        }
        let verdict = if self.conclusion.is_empty() {
            &self.state
        } else {
            &self.conclusion
        };
        match verdict.to_uppercase().as_str() {
            "SUCCESS" | "NEUTRAL" | "SKIPPED" => CheckStatus::Pass,
            "FAILURE" | "ERROR" | "CANCELLED" | "TIMED_OUT" | "ACTION_REQUIRED" => {
                CheckStatus::Fail
            }
            _ => CheckStatus::Pending,
        }
    }
}

/// Aggregate a rollup: any failure fails the branch, any unfinished check is
/// pending, and a branch with no checks configured counts as passing.
fn rollup_status(checks: &[RawCheck]) -> CheckStatus {
    if checks.iter().any(|c| c.outcome() == CheckStatus::Fail) {
        CheckStatus::Fail
    } else if checks.iter().any(|c| c.outcome() == CheckStatus::Pending) {
        CheckStatus::Pending
    } else {
        CheckStatus::Pass
    }
}

impl From<RawPr> for PullRequest {
    fn from(raw: RawPr) -> Self {
        let state = match raw.state.to_lowercase().as_str() {
            "merged" => PrState::Merged,
            "closed" => PrState::Closed,
            _ => PrState::Open,
        };
        PullRequest {
            number: raw.number,
            branch: raw.branch,
            state,
            review_comments: Vec::new(),
            check_status: rollup_status(&raw.status_check_rollup),
            body: raw.body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawComment {
    #[serde(default)]
    body: String,
}

/// Manager for PR operations
pub struct PrManager<E: GhExecutor> {
    executor: E,
}

impl<E: GhExecutor> PrManager<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Create and check out a work branch off the current HEAD.
    #[instrument(skip(self))]
    pub async fn create_branch(&self, name: &str) -> Result<()> {
        let output = self.executor.exec(&["git", "checkout", "-b", name]).await?;
        if !output.success {
            return Err(CabinetError::TrackerFatal(format!(
                "failed to create branch {}: {}",
                name,
                output.stderr.trim()
            )));
        }
        info!("Created branch: {}", name);
        Ok(())
    }

    /// Check out an existing branch (used to return to main).
    #[instrument(skip(self))]
    pub async fn checkout(&self, name: &str) -> Result<()> {
        self.executor.exec(&["git", "checkout", name]).await?;
        Ok(())
    }

    /// The open PR for a branch, if one exists.
    #[instrument(skip(self))]
    pub async fn for_branch(&self, branch: &str) -> Result<Option<PullRequest>> {
        let output = self
            .executor
            .exec(&["gh", "pr", "view", branch, "--json", PR_VIEW_FIELDS])
            .await?;
        if !output.success || output.stdout.trim().is_empty() {
            return Ok(None);
        }
        let raw: RawPr = serde_json::from_str(&output.stdout)
            .map_err(|e| CabinetError::TrackerFatal(format!("bad PR JSON: {}", e)))?;
        Ok(Some(raw.into()))
    }

    #[instrument(skip(self))]
    pub async fn view(&self, number: u64) -> Result<PullRequest> {
        let number_arg = number.to_string();
        let output = exec_with_retry(
            &self.executor,
            &["gh", "pr", "view", &number_arg, "--json", PR_VIEW_FIELDS],
        )
        .await?;
        let raw: RawPr = serde_json::from_str(&output.stdout)
            .map_err(|e| CabinetError::TrackerFatal(format!("bad PR JSON: {}", e)))?;
        Ok(raw.into())
    }

    /// Human-readable check results for coder feedback. `gh pr checks` exits
    /// non-zero when checks fail, so the exit status is ignored.
    #[instrument(skip(self))]
    pub async fn check_summary(&self, number: u64) -> Result<String> {
        let number_arg = number.to_string();
        let output = self
            .executor
            .exec(&["gh", "pr", "checks", &number_arg])
            .await?;
        Ok(output.stdout)
    }

    /// All PR conversation comments, oldest first.
    #[instrument(skip(self))]
    pub async fn comments(&self, number: u64) -> Result<Vec<String>> {
        let number_arg = number.to_string();
        let output = exec_with_retry(
            &self.executor,
            &["gh", "pr", "view", &number_arg, "--json", "comments", "-q", ".comments"],
        )
        .await?;
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawComment> = serde_json::from_str(&output.stdout)
            .map_err(|e| CabinetError::TrackerFatal(format!("bad PR comments JSON: {}", e)))?;
        Ok(raw.into_iter().map(|c| c.body).collect())
    }

    #[instrument(skip(self, body))]
    pub async fn comment(&self, number: u64, body: &str) -> Result<()> {
        let number_arg = number.to_string();
        exec_with_retry(
            &self.executor,
            &["gh", "pr", "comment", &number_arg, "--body", body],
        )
        .await?;
        Ok(())
    }

    /// Squash-merge a PR and delete its branch.
    #[instrument(skip(self))]
    pub async fn merge(&self, number: u64) -> Result<()> {
        let number_arg = number.to_string();
        exec_with_retry(
            &self.executor,
            &["gh", "pr", "merge", &number_arg, "--squash", "--delete-branch"],
        )
        .await?;
        info!("Merged PR #{}", number);
        Ok(())
    }

    /// Close a PR without merging.
    #[instrument(skip(self))]
    pub async fn close(&self, number: u64) -> Result<()> {
        let number_arg = number.to_string();
        exec_with_retry(
            &self.executor,
            &["gh", "pr", "close", &number_arg, "--delete-branch"],
        )
        .await?;
        info!("Closed PR #{} unmerged", number);
        Ok(())
    }

    /// PRs merged during roughly the current cycle, newest first.
    #[instrument(skip(self))]
    pub async fn recently_merged(&self, limit: u32) -> Result<Vec<PullRequest>> {
        let limit = limit.to_string();
        let output = exec_with_retry(
            &self.executor,
            &[
                "gh", "pr", "list", "--state", "merged", "--json", PR_LIST_FIELDS,
                "--limit", &limit,
            ],
        )
        .await?;
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawPr> = serde_json::from_str(&output.stdout)
            .map_err(|e| CabinetError::TrackerFatal(format!("bad PR list JSON: {}", e)))?;
        Ok(raw.into_iter().map(PullRequest::from).collect())
    }

    /// Open PRs, newest first.
    #[instrument(skip(self))]
    pub async fn open(&self, limit: u32) -> Result<Vec<PullRequest>> {
        let limit = limit.to_string();
        let output = exec_with_retry(
            &self.executor,
            &[
                "gh", "pr", "list", "--state", "open", "--json", PR_LIST_FIELDS,
                "--limit", &limit,
            ],
        )
        .await?;
        if output.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawPr> = serde_json::from_str(&output.stdout)
            .map_err(|e| CabinetError::TrackerFatal(format!("bad PR list JSON: {}", e)))?;
        Ok(raw.into_iter().map(PullRequest::from).collect())
    }
}
