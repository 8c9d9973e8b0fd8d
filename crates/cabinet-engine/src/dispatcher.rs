//! Deterministic plan executor.
//!
//! Runs the Conductor's actions in order, records phase results, stops early
//! on `halt`, and never lets a failed action escape the cycle. In dry-run
//! mode every non-read-only action is logged and skipped while telemetry is
//! still written.
//!
//! Most actions produce exactly one phase record; `pick_and_execute` on a
//! code-change issue produces one record per coder-reviewer round.

use cabinet_agent::AgentRunner;
use cabinet_core::{
    Action, CabinetError, ConductorPlan, CyclePhaseResult, CycleTelemetry, ErrorEntry,
    IssueState, PhaseError, Result, YieldKind, LABEL_BACKLOG, LABEL_IN_PROGRESS,
    LABEL_PROPOSED, LABEL_TASK_ANALYSIS, LABEL_TASK_CODE,
};
use cabinet_session::{rebuild_index, save_result};
use cabinet_tracker::GhExecutor;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::debate::run_debate;
use crate::engine::Engine;
use crate::intake::{decision_from_issue_body, step_fetch_news};
use crate::journal::append_error_entry;
use crate::oversight::{
    step_director, step_editorial_review, step_propose, step_research_scout,
    step_strategic_director,
};
use crate::pr_workflow::{run_pr_workflow, RoundLog, WorkflowOutcome};

/// Debates run per `debate` action, bounding agent spend per cycle.
const DEBATES_PER_CYCLE: usize = 3;

/// Execute a validated plan, appending phase results to `telemetry`.
/// Returns the cycle's yield.
#[instrument(skip_all, fields(actions = plan.actions.len()))]
pub async fn dispatch<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    plan: &ConductorPlan,
    telemetry: &mut CycleTelemetry,
    today: NaiveDate,
) -> YieldKind {
    let mut pr_merged = false;
    let mut analysis_published = false;

    for action in &plan.actions {
        let started_at = Utc::now();

        if let Some(reason) = skip_reason(engine, action) {
            info!("Skipping {} ({})", action.name(), reason);
            telemetry.phases.push(CyclePhaseResult {
                action: action.name().to_string(),
                started_at,
                ended_at: Utc::now(),
                success: true,
                error: None,
            });
            if matches!(action, Action::Halt) {
                break;
            }
            continue;
        }

        // pick_and_execute manages its own phase records (one per PR round)
        if let Action::PickAndExecute { issue_number } = action {
            let (phases, yielded) = execute_pick(engine, *issue_number, started_at).await;
            telemetry.phases.extend(phases);
            match yielded {
                Some(YieldKind::PrMerged) => pr_merged = true,
                Some(YieldKind::AnalysisPublished) => analysis_published = true,
                _ => {}
            }
            continue;
        }

        let outcome = execute_action(engine, action, today).await;
        let (success, error) = match &outcome {
            Ok(()) => (true, None),
            Err(err) => {
                warn!("Action {} failed: {}", action.name(), err);
                record_error(engine, action.name(), err);
                (false, Some(PhaseError::from_error(err)))
            }
        };
        telemetry.phases.push(CyclePhaseResult {
            action: action.name().to_string(),
            started_at,
            ended_at: Utc::now(),
            success,
            error,
        });

        if matches!(action, Action::Halt) {
            info!("Halt action: stopping dispatch");
            break;
        }
    }

    if pr_merged {
        YieldKind::PrMerged
    } else if analysis_published {
        YieldKind::AnalysisPublished
    } else {
        YieldKind::None
    }
}

fn record_error<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    step: &str,
    err: &CabinetError,
) {
    let entry = ErrorEntry::from_error(step, err);
    if let Err(write_err) = append_error_entry(&engine.config.errors_path(), &entry) {
        warn!("Could not persist error entry: {}", write_err);
    }
}

/// Why an action will not run this cycle, if any.
fn skip_reason<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    action: &Action,
) -> Option<&'static str> {
    let config = &engine.config;
    match action {
        Action::FetchNews if config.skip_analysis => Some("--skip-analysis"),
        Action::Propose | Action::Debate if config.skip_improve => Some("--skip-improve"),
        Action::ResearchScout if config.skip_research => Some("--skip-research"),
        _ if config.dry_run && !action.is_read_only() => Some("dry run"),
        _ => None,
    }
}

async fn execute_action<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    action: &Action,
    today: NaiveDate,
) -> Result<()> {
    let issues = engine.issues();
    let runner = engine.runner();
    let config = &engine.config;

    match action {
        Action::FetchNews => {
            let created = step_fetch_news(&issues, &*runner, config, today).await?;
            debug!("fetch_news created {} issue(s)", created);
        }
        Action::Propose => {
            step_propose(&issues, &*runner, config, 1).await?;
        }
        Action::Debate => {
            let proposed = issues.list_open_by_label(LABEL_PROPOSED, 20).await?;
            for issue in proposed.iter().take(DEBATES_PER_CYCLE) {
                run_debate(&issues, &*runner, config, issue).await?;
            }
        }
        Action::Director => {
            step_director(&issues, &*runner, config).await?;
        }
        Action::StrategicDirector => {
            step_strategic_director(&issues, &*runner, config).await?;
        }
        Action::ResearchScout => {
            step_research_scout(&issues, &*runner, config, Utc::now()).await?;
        }
        Action::Cooldown { seconds } => {
            tokio::time::sleep(std::time::Duration::from_secs(*seconds)).await;
        }
        Action::FileIssue { title, description } => {
            issues
                .create(title, description, &[LABEL_BACKLOG, LABEL_TASK_CODE])
                .await?;
        }
        Action::Halt | Action::SkipCycle => {}
        Action::PickAndExecute { .. } => unreachable!("handled by execute_pick"),
    }
    Ok(())
}

/// How a pick-and-execute ended, before conversion to phase records.
enum PickOutcome {
    AnalysisPublished,
    CodeMerged(Vec<RoundLog>),
    CodeExhausted(Vec<RoundLog>),
}

/// Run one pick-and-execute and convert the outcome to phase records.
async fn execute_pick<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    issue_number: u64,
    started_at: DateTime<Utc>,
) -> (Vec<CyclePhaseResult>, Option<YieldKind>) {
    match execute_issue(engine, issue_number).await {
        Ok(PickOutcome::AnalysisPublished) => (
            vec![CyclePhaseResult {
                action: "pick_and_execute".to_string(),
                started_at,
                ended_at: Utc::now(),
                success: true,
                error: None,
            }],
            Some(YieldKind::AnalysisPublished),
        ),
        Ok(PickOutcome::CodeMerged(rounds)) => {
            (round_phases(engine, rounds, false), Some(YieldKind::PrMerged))
        }
        Ok(PickOutcome::CodeExhausted(rounds)) => (round_phases(engine, rounds, true), None),
        Err(err) => {
            warn!("pick_and_execute #{} failed: {}", issue_number, err);
            record_error(engine, "pick_and_execute", &err);
            (
                vec![CyclePhaseResult {
                    action: "pick_and_execute".to_string(),
                    started_at,
                    ended_at: Utc::now(),
                    success: false,
                    error: Some(PhaseError::from_error(&err)),
                }],
                None,
            )
        }
    }
}

/// One phase record per coder-reviewer round. When the workflow exhausted,
/// the final round is marked failed so the cycle's outcome is visible.
fn round_phases<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    rounds: Vec<RoundLog>,
    exhausted: bool,
) -> Vec<CyclePhaseResult> {
    let last = rounds.len().saturating_sub(1);
    rounds
        .into_iter()
        .enumerate()
        .map(|(index, log)| {
            if let Some(error) = &log.error {
                let err = CabinetError::Other(error.message.clone());
                let mut entry = ErrorEntry::from_error("pick_and_execute", &err);
                entry.kind = error.kind.clone();
                if let Err(write_err) =
                    append_error_entry(&engine.config.errors_path(), &entry)
                {
                    warn!("Could not persist round error: {}", write_err);
                }
            }
            let failed_final = exhausted && index == last && log.error.is_none();
            let error = if failed_final {
                Some(PhaseError {
                    kind: "Other".to_string(),
                    message: format!("PR workflow exhausted after {} round(s)", index + 1),
                    stack: String::new(),
                })
            } else {
                log.error.clone()
            };
            CyclePhaseResult {
                action: "pick_and_execute".to_string(),
                started_at: log.started_at,
                ended_at: log.ended_at,
                success: error.is_none(),
                error,
            }
        })
        .collect()
}

/// Mark an issue failed with a final comment; best-effort.
async fn mark_failed<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    issue_number: u64,
    reason: &str,
) {
    let issues = engine.issues();
    if let Ok(issue) = issues.view(issue_number).await {
        if let Err(err) = issues.set_state(&issue, IssueState::Failed).await {
            warn!("Could not mark #{} failed: {}", issue_number, err);
        }
    }
    let comment = format!("Execution failed: {}", reason);
    if let Err(err) = issues.comment(issue_number, &comment).await {
        warn!("Could not comment on #{}: {}", issue_number, err);
    }
}

/// Pick-and-execute: route one backlog issue to the analysis pipeline or the
/// PR workflow. Only one issue may be in progress at a time.
async fn execute_issue<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    issue_number: u64,
) -> Result<PickOutcome> {
    let issues = engine.issues();

    let issue = issues.view(issue_number).await?;
    if !issue.open || issue.state() != Some(IssueState::Backlog) {
        return Err(CabinetError::StateConflict(format!(
            "issue #{} is not an open backlog issue",
            issue_number
        )));
    }
    let in_progress = issues.list_open_by_label(LABEL_IN_PROGRESS, 10).await?;
    if !in_progress.is_empty() {
        return Err(CabinetError::StateConflict(format!(
            "issue #{} already in progress",
            in_progress[0].number
        )));
    }

    issues.set_state(&issue, IssueState::InProgress).await?;

    let outcome = if issue.has_label(LABEL_TASK_ANALYSIS) {
        execute_analysis(engine, issue_number, &issue.body).await
    } else {
        execute_code_change(engine, &issue).await
    };

    match outcome {
        Ok(pick) => Ok(pick),
        Err(err) => {
            mark_failed(engine, issue_number, &err.to_string()).await;
            Err(err)
        }
    }
}

async fn execute_analysis<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    issue_number: u64,
    body: &str,
) -> Result<PickOutcome> {
    let issues = engine.issues();
    let config = &engine.config;

    let decision = decision_from_issue_body(body).ok_or_else(|| {
        CabinetError::AgentParse(format!(
            "issue #{} has no embedded decision JSON",
            issue_number
        ))
    })?;

    let outcome = engine.pipeline().analyze(&decision).await?;
    for (phase, err) in &outcome.failures {
        let entry = ErrorEntry::from_error(phase, err).with_issue(issue_number);
        if let Err(write_err) = append_error_entry(&config.errors_path(), &entry) {
            warn!("Could not persist pipeline failure: {}", write_err);
        }
    }

    let mut result = outcome.result;
    result.issue_number = Some(issue_number);
    let result_path = save_result(&config.analyses_dir(), &result)?;
    rebuild_index(&config.analyses_dir(), &config.analyses_index_path())?;

    // Post a compact scorecard on the issue
    let score_lines: Vec<String> = result
        .assessments
        .iter()
        .map(|a| format!("- {}: {}/10 ({})", a.ministry, a.score, a.verdict))
        .collect();
    let verdict_line = result
        .debate
        .as_ref()
        .map(|d| format!("\n\n**Parliament verdict**: {}", d.overall_verdict))
        .unwrap_or_default();
    issues
        .comment(
            issue_number,
            &format!(
                "## Cabinet scorecard\n\n{}{}",
                score_lines.join("\n"),
                verdict_line
            ),
        )
        .await?;

    // Editorial review is non-blocking by contract
    let runner = engine.runner();
    if let Some(review) =
        step_editorial_review(&issues, &*runner, config, &result, &result_path).await
    {
        info!(
            "Editorial review: {} (score {}/10)",
            if review.approved { "approved" } else { "flagged" },
            review.quality_score,
        );
    }

    if !config.social_posting_enabled {
        debug!("Social posting disabled (no credentials)");
    }

    let refreshed = issues.view(issue_number).await?;
    issues.set_state(&refreshed, IssueState::Done).await?;
    issues.close(issue_number).await?;
    info!("Analysis issue #{} published", issue_number);
    Ok(PickOutcome::AnalysisPublished)
}

async fn execute_code_change<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    issue: &cabinet_core::Issue,
) -> Result<PickOutcome> {
    let issues = engine.issues();
    let runner = engine.runner();

    match run_pr_workflow(&engine.prs(), &*runner, &engine.config, issue).await? {
        WorkflowOutcome::Merged { pr_number, rounds } => {
            info!("PR #{} merged after {} round(s)", pr_number, rounds.len());
            let refreshed = issues.view(issue.number).await?;
            issues.set_state(&refreshed, IssueState::Done).await?;
            issues.close(issue.number).await?;
            Ok(PickOutcome::CodeMerged(rounds))
        }
        WorkflowOutcome::Exhausted { pr_number, rounds } => {
            let reason = format!(
                "PR workflow exhausted after {} round(s) (pr: {:?})",
                rounds.len(),
                pr_number
            );
            mark_failed(engine, issue.number, &reason).await;
            Ok(PickOutcome::CodeExhausted(rounds))
        }
    }
}
