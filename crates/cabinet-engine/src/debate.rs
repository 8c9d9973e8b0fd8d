//! Debate filter: advocate vs. skeptic with a deterministic judge.
//!
//! No third LLM adjudicates. The advocate scores the proposal's strength,
//! the skeptic scores its weakness, and a fixed threshold decides. Issues
//! carrying `human-suggestion` bypass the debate entirely; that check happens
//! before any agent is spawned.

use cabinet_agent::{extract_json_object, AgentRequest, AgentRunner};
use cabinet_core::{
    CabinetError, EngineConfig, Issue, IssueState, Result, LABEL_HUMAN,
};
use cabinet_session::load_role_prompt;
use cabinet_tracker::{GhExecutor, IssueManager};
use serde_json::Value;
use tracing::{info, instrument};

const DEBATE_MAX_TURNS: u32 = 5;

/// Outcome of one debate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebateVerdict {
    pub accepted: bool,
    pub strength_score: i64,
    pub weakness_score: i64,
    /// True when the issue skipped the debate via `human-suggestion`
    pub bypassed: bool,
}

fn clamp_score(value: Option<i64>) -> i64 {
    value.unwrap_or(0).clamp(0, 10)
}

fn score_from(value: &Value, field: &str) -> i64 {
    clamp_score(value.get(field).and_then(Value::as_i64))
}

/// Run the debate filter over one proposed issue, moving it to backlog or
/// rejected.
#[instrument(skip_all, fields(issue = issue.number))]
pub async fn run_debate<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
    issue: &Issue,
) -> Result<DebateVerdict> {
    // Human override: straight to backlog, no agents spawned
    if issue.has_label(LABEL_HUMAN) {
        issues.set_state(issue, IssueState::Backlog).await?;
        issues
            .comment(
                issue.number,
                "Triage: human suggestion moved straight to backlog (debate bypassed).",
            )
            .await?;
        info!("Issue #{} bypassed debate (human-suggestion)", issue.number);
        return Ok(DebateVerdict {
            accepted: true,
            strength_score: 0,
            weakness_score: 0,
            bypassed: true,
        });
    }

    let prompts_dir = config.prompts_dir();
    let pm_prompt = load_role_prompt(&prompts_dir, "pm");
    let reviewer_prompt = load_role_prompt(&prompts_dir, "reviewer");

    // Advocate argues for the proposal
    let advocate_request = AgentRequest::new(
        &pm_prompt,
        &format!(
            "Argue for this proposed improvement.\n\n\
             Title: {}\n\nDescription:\n{}\n\n\
             Return a single JSON object: {{\"strength_score\": <0-10 integer>, \
             \"key_arguments\": [<strings>]}}. \
             Score how much concrete value this delivers right now.",
            issue.title, issue.body,
        ),
        &config.model,
    )
    .with_max_turns(DEBATE_MAX_TURNS)
    .with_timeout(std::time::Duration::from_secs(config.agent_timeout_seconds));
    let advocate = runner.run(&advocate_request).await?;
    let advocate_json = extract_json_object(&advocate.text)
        .ok_or_else(|| CabinetError::AgentParse("advocate output has no JSON".into()))?;
    let strength_score = score_from(&advocate_json, "strength_score");

    // Skeptic challenges, seeing the advocate's case
    let skeptic_request = AgentRequest::new(
        &reviewer_prompt,
        &format!(
            "Challenge this proposed improvement.\n\n\
             Title: {}\n\nDescription:\n{}\n\n\
             The advocate's case:\n{}\n\n\
             Return a single JSON object: {{\"weakness_score\": <0-10 integer>, \
             \"risks\": [<strings>]}}. \
             Score how risky, ill-scoped, or low-value this proposal is.",
            issue.title, issue.body, advocate.text,
        ),
        &config.model,
    )
    .with_max_turns(DEBATE_MAX_TURNS)
    .with_timeout(std::time::Duration::from_secs(config.agent_timeout_seconds));
    let skeptic = runner.run(&skeptic_request).await?;
    let skeptic_json = extract_json_object(&skeptic.text)
        .ok_or_else(|| CabinetError::AgentParse("skeptic output has no JSON".into()))?;
    let weakness_score = score_from(&skeptic_json, "weakness_score");

    // Deterministic judge; ties reject
    let accepted = strength_score - weakness_score >= config.debate_threshold;

    let comment = format!(
        "## Triage debate\n\n\
         **Advocate** (strength {}/10):\n{}\n\n\
         **Skeptic** (weakness {}/10):\n{}\n\n\
         ### Result: **{}** (threshold {})",
        strength_score,
        advocate.text,
        weakness_score,
        skeptic.text,
        if accepted { "ACCEPTED" } else { "REJECTED" },
        config.debate_threshold,
    );
    issues.comment(issue.number, &comment).await?;

    if accepted {
        issues.set_state(issue, IssueState::Backlog).await?;
        info!(
            "ACCEPTED #{} (strength {} - weakness {} >= {})",
            issue.number, strength_score, weakness_score, config.debate_threshold
        );
    } else {
        issues.set_state(issue, IssueState::Rejected).await?;
        issues.close(issue.number).await?;
        info!(
            "REJECTED #{} (strength {} - weakness {} < {})",
            issue.number, strength_score, weakness_score, config.debate_threshold
        );
    }

    Ok(DebateVerdict {
        accepted,
        strength_score,
        weakness_score,
        bypassed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_agent::MockAgentRunner;
    use cabinet_core::{LABEL_PROPOSED, LABEL_REJECTED};
    use cabinet_tracker::{GhOutput, MockGhExecutor};
    use chrono::Utc;

    fn proposed_issue(number: u64, labels: &[&str]) -> Issue {
        Issue {
            number,
            title: "Add retry metrics".to_string(),
            body: "Track retries per phase".to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            open: true,
            created_at: Utc::now(),
        }
    }

    fn permissive_executor() -> MockGhExecutor {
        MockGhExecutor::new()
            .with_prefix_response("gh issue edit", GhOutput::ok(""))
            .with_prefix_response("gh issue comment", GhOutput::ok(""))
            .with_prefix_response("gh issue close", GhOutput::ok(""))
    }

    #[tokio::test]
    async fn test_accept_when_strength_clears_threshold() {
        let issues = IssueManager::new(permissive_executor());
        let runner = MockAgentRunner::new()
            .respond("Argue for", r#"{"strength_score": 8, "key_arguments": ["a"]}"#)
            .respond("Challenge", r#"{"weakness_score": 3, "risks": []}"#);
        let config = EngineConfig::default();

        let verdict = run_debate(&issues, &runner, &config, &proposed_issue(5, &[LABEL_PROPOSED]))
            .await
            .unwrap();
        assert!(verdict.accepted);
        assert!(!verdict.bypassed);
        assert!(issues
            .executor()
            .saw_call("gh issue edit 5 --remove-label self-improve:proposed --add-label self-improve:backlog"));
    }

    #[tokio::test]
    async fn test_reject_on_tie() {
        let issues = IssueManager::new(permissive_executor());
        // 5 - 3 = 2 with threshold 2 accepts; 5 - 4 = 1 rejects. Tie means
        // difference exactly below threshold is rejected.
        let runner = MockAgentRunner::new()
            .respond("Argue for", r#"{"strength_score": 5}"#)
            .respond("Challenge", r#"{"weakness_score": 4}"#);
        let config = EngineConfig::default();

        let verdict = run_debate(&issues, &runner, &config, &proposed_issue(6, &[LABEL_PROPOSED]))
            .await
            .unwrap();
        assert!(!verdict.accepted);
        assert!(issues.executor().saw_call("gh issue close 6"));
        assert!(issues
            .executor()
            .calls()
            .iter()
            .any(|c| c.contains(LABEL_REJECTED)));
    }

    #[tokio::test]
    async fn test_human_suggestion_bypasses_debate() {
        let issues = IssueManager::new(permissive_executor());
        // No agent responses scripted: spawning any agent would fail the test
        let runner = MockAgentRunner::new();
        let config = EngineConfig::default();

        let issue = proposed_issue(7, &[LABEL_PROPOSED, LABEL_HUMAN]);
        let verdict = run_debate(&issues, &runner, &config, &issue).await.unwrap();
        assert!(verdict.accepted);
        assert!(verdict.bypassed);
        assert_eq!(runner.call_count(), 0);
        assert!(issues
            .executor()
            .saw_call("gh issue edit 7 --remove-label self-improve:proposed --add-label self-improve:backlog"));
    }

    #[tokio::test]
    async fn test_unparseable_advocate_fails_debate() {
        let issues = IssueManager::new(permissive_executor());
        let runner = MockAgentRunner::new().respond("Argue for", "no json here");
        let config = EngineConfig::default();

        let err = run_debate(&issues, &runner, &config, &proposed_issue(8, &[LABEL_PROPOSED]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AgentParseError");
    }

    #[tokio::test]
    async fn test_out_of_range_scores_are_clamped() {
        let issues = IssueManager::new(permissive_executor());
        let runner = MockAgentRunner::new()
            .respond("Argue for", r#"{"strength_score": 99}"#)
            .respond("Challenge", r#"{"weakness_score": -5}"#);
        let config = EngineConfig::default();

        let verdict = run_debate(&issues, &runner, &config, &proposed_issue(9, &[LABEL_PROPOSED]))
            .await
            .unwrap();
        assert_eq!(verdict.strength_score, 10);
        assert_eq!(verdict.weakness_score, 0);
        assert!(verdict.accepted);
    }
}
