//! Issue operations and the label state machine at the tracker boundary.

use cabinet_core::{CabinetError, Issue, IssueState, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::command::GhExecutor;
use crate::retry::exec_with_retry;

/// Issue JSON fields requested from `gh`.
const ISSUE_JSON_FIELDS: &str = "number,title,body,labels,state,createdAt";

/// Wire shape of `gh issue list/view --json` output.
#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    state: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            body: raw.body,
            labels: raw.labels.into_iter().map(|l| l.name).collect(),
            open: raw.state.eq_ignore_ascii_case("open"),
            created_at: raw.created_at,
        }
    }
}

/// Manager for issue operations
pub struct IssueManager<E: GhExecutor> {
    executor: E,
}

impl<E: GhExecutor> IssueManager<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// List open issues carrying `label`, oldest first.
    #[instrument(skip(self))]
    pub async fn list_open_by_label(&self, label: &str, limit: u32) -> Result<Vec<Issue>> {
        let limit = limit.to_string();
        let output = exec_with_retry(
            &self.executor,
            &[
                "gh", "issue", "list", "--label", label, "--state", "open", "--json",
                ISSUE_JSON_FIELDS, "--limit", &limit,
            ],
        )
        .await?;
        let mut issues = parse_issues(&output.stdout)?;
        issues.sort_by_key(|i| i.created_at);
        Ok(issues)
    }

    /// List issues in any state, newest first as returned by the tracker.
    #[instrument(skip(self))]
    pub async fn list_all(&self, limit: u32) -> Result<Vec<Issue>> {
        let limit = limit.to_string();
        let output = exec_with_retry(
            &self.executor,
            &[
                "gh", "issue", "list", "--state", "all", "--json", ISSUE_JSON_FIELDS,
                "--limit", &limit,
            ],
        )
        .await?;
        parse_issues(&output.stdout)
    }

    /// Search issues (any state) for a query string.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<Issue>> {
        let limit = limit.to_string();
        let output = exec_with_retry(
            &self.executor,
            &[
                "gh", "issue", "list", "--state", "all", "--search", query, "--json",
                ISSUE_JSON_FIELDS, "--limit", &limit,
            ],
        )
        .await?;
        parse_issues(&output.stdout)
    }

    #[instrument(skip(self))]
    pub async fn view(&self, number: u64) -> Result<Issue> {
        let number_arg = number.to_string();
        let output = exec_with_retry(
            &self.executor,
            &["gh", "issue", "view", &number_arg, "--json", ISSUE_JSON_FIELDS],
        )
        .await?;
        let raw: RawIssue = serde_json::from_str(&output.stdout)
            .map_err(|e| CabinetError::TrackerFatal(format!("bad issue JSON: {}", e)))?;
        Ok(raw.into())
    }

    /// Create an issue; returns the new issue number parsed from the URL that
    /// `gh issue create` prints.
    #[instrument(skip(self, body))]
    pub async fn create(&self, title: &str, body: &str, labels: &[&str]) -> Result<u64> {
        let label_arg = labels.join(",");
        let mut args = vec!["gh", "issue", "create", "--title", title, "--body", body];
        if !labels.is_empty() {
            args.extend_from_slice(&["--label", &label_arg]);
        }
        let output = exec_with_retry(&self.executor, &args).await?;
        let number = issue_number_from_url(output.stdout.trim()).ok_or_else(|| {
            CabinetError::TrackerFatal(format!(
                "could not parse issue number from: {}",
                output.stdout.trim()
            ))
        })?;
        info!("Created issue #{}: {}", number, title);
        Ok(number)
    }

    #[instrument(skip(self, body))]
    pub async fn comment(&self, number: u64, body: &str) -> Result<()> {
        let number_arg = number.to_string();
        exec_with_retry(
            &self.executor,
            &["gh", "issue", "comment", &number_arg, "--body", body],
        )
        .await?;
        Ok(())
    }

    /// All comment bodies on an issue, oldest first.
    #[instrument(skip(self))]
    pub async fn comments(&self, number: u64) -> Result<Vec<String>> {
        let number_arg = number.to_string();
        let output = exec_with_retry(
            &self.executor,
            &[
                "gh", "issue", "view", &number_arg, "--json", "comments", "-q",
                ".comments[].body",
            ],
        )
        .await?;
        Ok(output
            .stdout
            .split("\n\n")
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn close(&self, number: u64) -> Result<()> {
        let number_arg = number.to_string();
        exec_with_retry(&self.executor, &["gh", "issue", "close", &number_arg]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_label(&self, number: u64, label: &str) -> Result<()> {
        let number_arg = number.to_string();
        exec_with_retry(
            &self.executor,
            &["gh", "issue", "edit", &number_arg, "--add-label", label],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_label(&self, number: u64, label: &str) -> Result<()> {
        let number_arg = number.to_string();
        exec_with_retry(
            &self.executor,
            &["gh", "issue", "edit", &number_arg, "--remove-label", label],
        )
        .await?;
        Ok(())
    }

    /// Transition an issue's lifecycle state, translating to label swaps.
    ///
    /// Idempotent under re-delivery: transitioning to the state the issue is
    /// already in is a no-op. Violated preconditions fail gracefully with
    /// `StateConflict` and are never retried.
    #[instrument(skip(self))]
    pub async fn set_state(&self, issue: &Issue, next: IssueState) -> Result<()> {
        let current = issue.state();
        match current {
            Some(state) if state == next => {
                debug!("Issue #{} already {}; no-op", issue.number, next);
                return Ok(());
            }
            Some(state) if !state.can_transition_to(next) => {
                return Err(CabinetError::StateConflict(format!(
                    "issue #{} is {} and cannot move to {}",
                    issue.number, state, next
                )));
            }
            _ => {}
        }
        if !issue.open && !next.is_terminal() {
            return Err(CabinetError::StateConflict(format!(
                "issue #{} is closed",
                issue.number
            )));
        }

        let number_arg = issue.number.to_string();
        match current {
            Some(state) => {
                exec_with_retry(
                    &self.executor,
                    &[
                        "gh", "issue", "edit", &number_arg, "--remove-label", state.label(),
                        "--add-label", next.label(),
                    ],
                )
                .await?;
            }
            None => {
                exec_with_retry(
                    &self.executor,
                    &["gh", "issue", "edit", &number_arg, "--add-label", next.label()],
                )
                .await?;
            }
        }
        info!("Issue #{} -> {}", issue.number, next);
        Ok(())
    }
}

fn parse_issues(stdout: &str) -> Result<Vec<Issue>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawIssue> = serde_json::from_str(stdout)
        .map_err(|e| CabinetError::TrackerFatal(format!("bad issue list JSON: {}", e)))?;
    Ok(raw.into_iter().map(Issue::from).collect())
}

/// Extract the trailing issue number from a `gh issue create` URL.
fn issue_number_from_url(url: &str) -> Option<u64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}
