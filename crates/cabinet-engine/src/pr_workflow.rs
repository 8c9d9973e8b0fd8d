//! Coder-reviewer PR workflow.
//!
//! init -> coding -> awaiting_review -> reviewing -> approved | changes_requested,
//! looping back to coding until merged or the round cap is hit. Reaching
//! awaiting_review requires an open PR with passing branch checks; failing
//! checks send the round back to the coder with the check output.
//!
//! Invariants: the reviewer never gets write tools, the coder never merges,
//! and every agent invocation is a fresh subprocess. A review round that ends
//! without a verdict comment is treated as changes-requested (fail-closed).

use std::time::Duration;

use cabinet_agent::{AgentRequest, AgentRunner};
use cabinet_core::{CabinetError, CheckStatus, EngineConfig, Issue, PhaseError, Result};
use cabinet_session::load_role_prompt;
use cabinet_tracker::{GhExecutor, PrManager};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const CODER_TOOLS: [&str; 6] = ["Bash", "Write", "Edit", "Read", "Glob", "Grep"];
const REVIEWER_TOOLS: [&str; 4] = ["Bash", "Read", "Glob", "Grep"];
const CODER_MAX_TURNS: u32 = 50;
const REVIEWER_MAX_TURNS: u32 = 30;

const VERDICT_APPROVED: &str = "VERDICT: APPROVED";
const VERDICT_CHANGES_REQUESTED: &str = "VERDICT: CHANGES_REQUESTED";

/// One coder-reviewer round, for the cycle's telemetry record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundLog {
    pub round: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// True only for the round that ended in a merge
    pub merged: bool,
    /// Set when an agent or tracker call failed during the round;
    /// a changes-requested verdict is not an error
    pub error: Option<PhaseError>,
}

/// How a workflow run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// PR merged; the caller marks the issue done
    Merged {
        pr_number: u64,
        rounds: Vec<RoundLog>,
    },
    /// Round cap exhausted; PR closed unmerged
    Exhausted {
        pr_number: Option<u64>,
        rounds: Vec<RoundLog>,
    },
}

impl WorkflowOutcome {
    pub fn rounds(&self) -> &[RoundLog] {
        match self {
            Self::Merged { rounds, .. } | Self::Exhausted { rounds, .. } => rounds,
        }
    }
}

/// Reviewer verdict parsed from PR comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewVerdict {
    Approved,
    ChangesRequested,
}

fn verdict_in(text: &str) -> Option<ReviewVerdict> {
    if text.contains(VERDICT_APPROVED) {
        Some(ReviewVerdict::Approved)
    } else if text.contains(VERDICT_CHANGES_REQUESTED) {
        Some(ReviewVerdict::ChangesRequested)
    } else {
        None
    }
}

/// The newest verdict across PR comments, falling back to the reviewer's raw
/// output when the comment never landed. Missing entirely -> changes
/// requested (fail-closed).
fn resolve_verdict(comments: &[String], reviewer_output: &str) -> ReviewVerdict {
    for comment in comments.iter().rev() {
        if let Some(verdict) = verdict_in(comment) {
            return verdict;
        }
    }
    if let Some(verdict) = verdict_in(reviewer_output) {
        warn!("Verdict found only in reviewer output, not in PR comments");
        return verdict;
    }
    warn!("No verdict posted; treating as CHANGES_REQUESTED (fail-closed)");
    ReviewVerdict::ChangesRequested
}

/// Generate a branch name from the issue title.
fn branch_name(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .take(40)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    let id = Uuid::new_v4().simple().to_string();
    format!("ai-dev/{}-{}", slug, &id[..8])
}

fn coder_first_prompt(task: &str, branch: &str, issue_number: u64) -> String {
    format!(
        "Implement this task on the branch `{}` (already checked out).\n\n\
         1. Read the task and explore just enough to understand the code.\n\
         2. Implement it, with tests following the existing patterns.\n\
         3. Run the project checks and fix what they find.\n\
         4. Commit, push the branch (`git push -u origin HEAD`), and open a PR \
         with `gh pr create`. The PR body MUST contain `Closes #{}`.\n\
         Do NOT merge the PR yourself.\n\nTask:\n{}",
        branch, issue_number, task,
    )
}

fn coder_followup_prompt(task: &str, pr_number: u64, feedback: &str) -> String {
    format!(
        "Your PR #{} received review feedback. Address it.\n\n\
         1. Read the feedback below and make the changes you agree with; reply \
         on the PR where you disagree.\n\
         2. Run the project checks and fix what they find.\n\
         3. Commit and push to the same branch.\n\
         Do NOT merge the PR yourself.\n\n\
         Reviewer feedback:\n{}\n\nOriginal task:\n{}",
        pr_number, feedback, task,
    )
}

fn reviewer_prompt(pr_number: u64) -> String {
    format!(
        "Review PR #{} thoroughly.\n\n\
         1. `gh pr diff {}` and read the surrounding code where needed.\n\
         2. Run the project checks.\n\
         3. Post your verdict as a PR comment with \
         `gh pr comment {} --body \"...\"`. The comment MUST contain exactly \
         `{}` or `{}`.\n\
         Request changes only for blocking problems: bugs, failing checks, \
         security issues, missing tests for new functionality.",
        pr_number, pr_number, pr_number, VERDICT_APPROVED, VERDICT_CHANGES_REQUESTED,
    )
}

fn round_error(log: &mut RoundLog, err: &CabinetError) {
    log.error = Some(PhaseError::from_error(err));
}

/// Drive one `task:code-change` issue to a merged PR or a capped failure.
/// Returns one [`RoundLog`] per coder-reviewer round.
#[instrument(skip_all, fields(issue = issue.number))]
pub async fn run_pr_workflow<E: GhExecutor, R: AgentRunner>(
    prs: &PrManager<E>,
    runner: &R,
    config: &EngineConfig,
    issue: &Issue,
) -> Result<WorkflowOutcome> {
    let prompts_dir = config.prompts_dir();
    let coder_system = load_role_prompt(&prompts_dir, "coder");
    let reviewer_system = load_role_prompt(&prompts_dir, "reviewer");
    let timeout = Duration::from_secs(config.agent_timeout_seconds);

    let task = format!(
        "{}\n\n{}\n\nCloses #{}",
        issue.title, issue.body, issue.number
    );
    let branch = branch_name(&issue.title);
    prs.create_branch(&branch).await?;

    let max_rounds = config.max_pr_rounds.max(1);
    let mut pr_number: Option<u64> = None;
    let mut feedback = String::new();
    let mut rounds: Vec<RoundLog> = Vec::new();

    for round in 1..=max_rounds {
        info!("PR workflow round {}/{}", round, max_rounds);
        let mut log = RoundLog {
            round,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            merged: false,
            error: None,
        };

        // Coding: first round implements and opens the PR, later rounds
        // address review feedback. Agent failures count as a failed round.
        let coder_prompt = match pr_number {
            None => coder_first_prompt(&task, &branch, issue.number),
            Some(number) => coder_followup_prompt(&task, number, &feedback),
        };
        let coder_request = AgentRequest::new(&coder_system, &coder_prompt, &config.model)
            .with_tools(&CODER_TOOLS)
            .with_max_turns(CODER_MAX_TURNS)
            .with_timeout(timeout);
        if let Err(err) = runner.run(&coder_request).await {
            warn!("Coder failed in round {}: {}", round, err);
            round_error(&mut log, &err);
            log.ended_at = Utc::now();
            rounds.push(log);
            continue;
        }

        // Awaiting review: a PR must exist now. A missing PR is a failed round.
        if pr_number.is_none() {
            match prs.for_branch(&branch).await {
                Ok(Some(pr)) => pr_number = Some(pr.number),
                Ok(None) => {
                    warn!("No PR on branch {} after coder round {}", branch, round);
                    round_error(
                        &mut log,
                        &CabinetError::Other(format!("no PR on branch {}", branch)),
                    );
                    log.ended_at = Utc::now();
                    rounds.push(log);
                    continue;
                }
                Err(err) => {
                    round_error(&mut log, &err);
                    log.ended_at = Utc::now();
                    rounds.push(log);
                    continue;
                }
            }
        }
        let number = pr_number.expect("pr exists");

        // Awaiting review gates on passing checks in the branch: failing
        // checks re-invoke the coder with the check output and consume the
        // round. Pending checks proceed; the reviewer runs them itself.
        match prs.view(number).await {
            Ok(pr) if pr.check_status == CheckStatus::Fail => {
                warn!("Checks failing on PR #{} in round {}", number, round);
                let summary = prs.check_summary(number).await.unwrap_or_default();
                feedback = format!(
                    "The checks on the PR branch are failing. Fix them and push \
                     before the review can start.\n\nCheck results:\n{}",
                    summary,
                );
                log.ended_at = Utc::now();
                rounds.push(log);
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Could not read PR #{} check status: {}", number, err);
                round_error(&mut log, &err);
                log.ended_at = Utc::now();
                rounds.push(log);
                continue;
            }
        }

        // Reviewing: read-only tools only
        let reviewer_request =
            AgentRequest::new(&reviewer_system, &reviewer_prompt(number), &config.model)
                .with_tools(&REVIEWER_TOOLS)
                .with_max_turns(REVIEWER_MAX_TURNS)
                .with_timeout(timeout);
        let reviewer_output = match runner.run(&reviewer_request).await {
            Ok(outcome) => outcome.text,
            Err(err) => {
                warn!("Reviewer failed in round {}: {}", round, err);
                round_error(&mut log, &err);
                String::new()
            }
        };

        let comments = prs.comments(number).await.unwrap_or_default();
        match resolve_verdict(&comments, &reviewer_output) {
            ReviewVerdict::Approved => match prs.merge(number).await {
                Ok(()) => {
                    log.merged = true;
                    log.ended_at = Utc::now();
                    rounds.push(log);
                    prs.checkout("main").await?;
                    return Ok(WorkflowOutcome::Merged {
                        pr_number: number,
                        rounds,
                    });
                }
                Err(err) => {
                    warn!("Merge of PR #{} failed: {}", number, err);
                    round_error(&mut log, &err);
                }
            },
            ReviewVerdict::ChangesRequested => {
                feedback = comments
                    .iter()
                    .rev()
                    .take(5)
                    .rev()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n\n---\n\n");
            }
        }
        log.ended_at = Utc::now();
        rounds.push(log);
    }

    // Exhausted: close the PR unmerged
    if let Some(number) = pr_number {
        if let Err(err) = prs.close(number).await {
            warn!("Could not close exhausted PR #{}: {}", number, err);
        }
    }
    prs.checkout("main").await?;
    Ok(WorkflowOutcome::Exhausted { pr_number, rounds })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_agent::MockAgentRunner;
    use cabinet_tracker::{GhOutput, MockGhExecutor};

    fn code_issue(number: u64) -> Issue {
        Issue {
            number,
            title: "Add retry metrics".to_string(),
            body: "Track retries per phase".to_string(),
            labels: ["self-improve:backlog", "task:code-change"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            open: true,
            created_at: Utc::now(),
        }
    }

    fn executor_with_pr(pr_json: &str) -> MockGhExecutor {
        MockGhExecutor::new()
            .with_prefix_response("git checkout", GhOutput::ok(""))
            .with_prefix_response("gh pr view ai-dev/", GhOutput::ok(pr_json))
            .with_prefix_response("gh pr view 8 --json number", GhOutput::ok(pr_json))
            .with_prefix_response("gh pr merge", GhOutput::ok(""))
            .with_prefix_response("gh pr close", GhOutput::ok(""))
    }

    const PR_JSON: &str = r#"{"number": 8, "headRefName": "ai-dev/x",
        "state": "OPEN", "body": "Closes #42",
        "statusCheckRollup": [{"status": "COMPLETED", "conclusion": "SUCCESS"}]}"#;

    const PR_JSON_FAILING_CHECKS: &str = r#"{"number": 8, "headRefName": "ai-dev/x",
        "state": "OPEN", "body": "Closes #42",
        "statusCheckRollup": [{"status": "COMPLETED", "conclusion": "FAILURE"}]}"#;

    fn approved_comments() -> GhOutput {
        GhOutput::ok(r#"[{"body": "Looks good.\n\nVERDICT: APPROVED"}]"#)
    }

    fn changes_comments() -> GhOutput {
        GhOutput::ok(r#"[{"body": "Needs tests.\n\nVERDICT: CHANGES_REQUESTED"}]"#)
    }

    #[tokio::test]
    async fn test_happy_path_merges_in_one_round() {
        let executor = executor_with_pr(PR_JSON)
            .with_prefix_response("gh pr view 8 --json comments", approved_comments());
        let prs = PrManager::new(executor);
        let runner = MockAgentRunner::new()
            .respond("Implement this task", "done, PR opened")
            .respond("Review PR #8", "posted verdict");
        let config = EngineConfig::default();

        let outcome = run_pr_workflow(&prs, &runner, &config, &code_issue(42))
            .await
            .unwrap();
        match &outcome {
            WorkflowOutcome::Merged { pr_number, rounds } => {
                assert_eq!(*pr_number, 8);
                assert_eq!(rounds.len(), 1);
                assert!(rounds[0].merged);
                assert!(rounds[0].error.is_none());
            }
            other => panic!("expected merge, got {:?}", other),
        }
        assert!(prs.executor().saw_call("gh pr merge 8"));
        // Coder prompt carried the Closes token
        assert!(runner.requests()[0].user_prompt.contains("Closes #42"));
        // Reviewer got read-only tools
        let reviewer = &runner.requests()[1];
        assert!(!reviewer.allowed_tools.contains(&"Write".to_string()));
        assert!(!reviewer.allowed_tools.contains(&"Edit".to_string()));
    }

    #[tokio::test]
    async fn test_exhaustion_closes_pr_with_one_log_per_round() {
        let executor = executor_with_pr(PR_JSON)
            .with_prefix_response("gh pr view 8 --json comments", changes_comments());
        let prs = PrManager::new(executor);
        let runner = MockAgentRunner::new()
            .respond("Implement this task", "PR opened")
            .respond("received review feedback", "pushed fixes")
            .respond("Review PR #8", "posted verdict");
        let config = EngineConfig {
            max_pr_rounds: 2,
            ..Default::default()
        };

        let outcome = run_pr_workflow(&prs, &runner, &config, &code_issue(42))
            .await
            .unwrap();
        match &outcome {
            WorkflowOutcome::Exhausted { pr_number, rounds } => {
                assert_eq!(*pr_number, Some(8));
                assert_eq!(rounds.len(), 2);
                assert!(rounds.iter().all(|r| !r.merged));
                // changes-requested is not an error
                assert!(rounds.iter().all(|r| r.error.is_none()));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(prs.executor().saw_call("gh pr close 8"));
        assert!(!prs.executor().saw_call("gh pr merge"));
    }

    #[tokio::test]
    async fn test_failing_checks_reinvoke_coder_and_consume_round() {
        let executor = executor_with_pr(PR_JSON_FAILING_CHECKS).with_response(
            "gh pr checks 8",
            GhOutput {
                stdout: "lint\tfail\t10s\n".to_string(),
                stderr: String::new(),
                success: false,
            },
        );
        let prs = PrManager::new(executor);
        let runner = MockAgentRunner::new()
            .respond("Implement this task", "PR opened")
            .respond("received review feedback", "fixed the checks");
        let config = EngineConfig {
            max_pr_rounds: 2,
            ..Default::default()
        };

        let outcome = run_pr_workflow(&prs, &runner, &config, &code_issue(42))
            .await
            .unwrap();
        match &outcome {
            WorkflowOutcome::Exhausted { pr_number, rounds } => {
                assert_eq!(*pr_number, Some(8));
                assert_eq!(rounds.len(), 2);
                // A failing-checks round is not an agent error
                assert!(rounds.iter().all(|r| r.error.is_none()));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        // The reviewer never ran; both invocations were the coder
        assert!(runner
            .requests()
            .iter()
            .all(|r| !r.user_prompt.contains("Review PR")));
        // Round two fed the check output back to the coder
        let followup = runner
            .requests()
            .iter()
            .find(|r| r.user_prompt.contains("checks on the PR branch are failing"))
            .cloned()
            .unwrap();
        assert!(followup.user_prompt.contains("lint"));
        assert!(prs.executor().saw_call("gh pr close 8"));
    }

    #[tokio::test]
    async fn test_missing_verdict_fails_closed() {
        let executor = executor_with_pr(PR_JSON)
            .with_prefix_response("gh pr view 8 --json comments", GhOutput::ok("[]"));
        let prs = PrManager::new(executor);
        let runner = MockAgentRunner::new()
            .respond("Implement this task", "PR opened")
            .respond("Review PR #8", "forgot to post a verdict");
        let config = EngineConfig {
            max_pr_rounds: 1,
            ..Default::default()
        };

        let outcome = run_pr_workflow(&prs, &runner, &config, &code_issue(42))
            .await
            .unwrap();
        // Fail-closed: no verdict means changes requested, and with one round
        // that exhausts the workflow without merging
        assert!(matches!(outcome, WorkflowOutcome::Exhausted { .. }));
        assert!(!prs.executor().saw_call("gh pr merge"));
    }

    #[tokio::test]
    async fn test_missing_pr_counts_as_failed_round() {
        let executor = MockGhExecutor::new()
            .with_prefix_response("git checkout", GhOutput::ok(""))
            .with_prefix_response("gh pr view ai-dev/", GhOutput::err("no pull requests found"));
        let prs = PrManager::new(executor);
        let runner = MockAgentRunner::new().respond("Implement this task", "forgot the PR");
        let config = EngineConfig {
            max_pr_rounds: 2,
            ..Default::default()
        };

        let outcome = run_pr_workflow(&prs, &runner, &config, &code_issue(42))
            .await
            .unwrap();
        match &outcome {
            WorkflowOutcome::Exhausted { pr_number, rounds } => {
                assert_eq!(*pr_number, None);
                assert_eq!(rounds.len(), 2);
                assert!(rounds.iter().all(|r| r.error.is_some()));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        // Coder was re-invoked each round; reviewer never ran
        assert_eq!(runner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_coder_timeout_is_recorded_in_round_log() {
        let executor = MockGhExecutor::new()
            .with_prefix_response("git checkout", GhOutput::ok(""));
        let prs = PrManager::new(executor);
        let runner = MockAgentRunner::new().fail_timeout("Implement this task");
        let config = EngineConfig {
            max_pr_rounds: 1,
            ..Default::default()
        };

        let outcome = run_pr_workflow(&prs, &runner, &config, &code_issue(42))
            .await
            .unwrap();
        let rounds = outcome.rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].error.as_ref().unwrap().kind, "AgentTimeout");
    }

    #[tokio::test]
    async fn test_changes_then_approval_merges_in_round_two() {
        let executor = executor_with_pr(PR_JSON)
            .with_response(
                "gh pr view 8 --json comments -q .comments",
                changes_comments(),
            )
            .with_response(
                "gh pr view 8 --json comments -q .comments",
                approved_comments(),
            );
        let prs = PrManager::new(executor);
        let runner = MockAgentRunner::new()
            .respond("Implement this task", "PR opened")
            .respond("received review feedback", "addressed feedback")
            .respond("Review PR #8", "posted verdict");
        let config = EngineConfig::default();

        let outcome = run_pr_workflow(&prs, &runner, &config, &code_issue(42))
            .await
            .unwrap();
        match &outcome {
            WorkflowOutcome::Merged { pr_number, rounds } => {
                assert_eq!(*pr_number, 8);
                assert_eq!(rounds.len(), 2);
                assert!(!rounds[0].merged);
                assert!(rounds[1].merged);
            }
            other => panic!("expected merge, got {:?}", other),
        }
        // The follow-up coder prompt carried the reviewer's feedback
        let followup = runner
            .requests()
            .iter()
            .find(|r| r.user_prompt.contains("received review feedback"))
            .cloned();
        assert!(followup.unwrap().user_prompt.contains("Needs tests"));
    }

    #[test]
    fn test_branch_name_shape() {
        let name = branch_name("Add retry metrics!");
        assert!(name.starts_with("ai-dev/add-retry-metrics-"));
        assert_eq!(name.rsplit('-').next().unwrap().len(), 8);
    }
}
