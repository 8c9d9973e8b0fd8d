//! Three-phase analysis pipeline.

use std::sync::Arc;
use std::time::Duration;

use cabinet_core::{
    Assessment, CabinetError, CounterProposal, CriticReport, Decision, Ministry,
    ParliamentDebate, Result, SessionResult, Verdict,
};
use cabinet_agent::{extract_json_object, AgentRequest, AgentRunner, Effort};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::roster::MinistryProfile;

/// A ministry/parliament/critic/synthesizer run that failed, for the
/// caller's error journal.
pub type PhaseFailure = (String, CabinetError);

/// Outcome of running the pipeline over one decision.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub result: SessionResult,
    /// Non-fatal failures recorded along the way
    pub failures: Vec<PhaseFailure>,
}

/// The analysis pipeline. Generic over the agent backend so tests can script
/// every agent without subprocesses.
pub struct Pipeline<R: AgentRunner + 'static> {
    runner: Arc<R>,
    roster: Vec<MinistryProfile>,
    parliament_prompt: String,
    critic_prompt: String,
    synthesizer_prompt: String,
    model: String,
    timeout: Duration,
}

impl<R: AgentRunner + 'static> Pipeline<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<R>,
        roster: Vec<MinistryProfile>,
        parliament_prompt: String,
        critic_prompt: String,
        synthesizer_prompt: String,
        model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            roster,
            parliament_prompt,
            critic_prompt,
            synthesizer_prompt,
            model,
            timeout,
        }
    }

    /// Analyze one decision through all three phases.
    #[instrument(skip_all, fields(decision = %decision.id))]
    pub async fn analyze(&self, decision: &Decision) -> Result<PipelineOutcome> {
        let mut result = SessionResult::new(decision.clone());
        let mut failures: Vec<PhaseFailure> = Vec::new();

        // Phase 1: ministries in parallel
        let mut set: JoinSet<(Ministry, Result<Assessment>)> = JoinSet::new();
        for profile in &self.roster {
            let runner = self.runner.clone();
            let request = self.ministry_request(profile, decision);
            let ministry = profile.ministry;
            let decision_id = decision.id.clone();
            set.spawn(async move {
                let outcome = match runner.run(&request).await {
                    Ok(outcome) => outcome,
                    Err(err) => return (ministry, Err(err)),
                };
                (ministry, parse_assessment(&outcome.text, ministry, &decision_id))
            });
        }
        while let Some(joined) = set.join_next().await {
            let Ok((ministry, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(assessment) => result.assessments.push(assessment),
                Err(err) => {
                    warn!("Ministry {} failed: {}", ministry, err);
                    failures.push((format!("ministry:{}", ministry.slug()), err));
                }
            }
        }
        if result.assessments.is_empty() {
            return Err(CabinetError::AnalysisEmpty(decision.id.clone()));
        }
        result.sort_assessments();
        info!(
            "Phase 1 complete: {}/{} assessments",
            result.assessments.len(),
            self.roster.len()
        );

        // Phase 2: parliament and critic in parallel over the survivors
        let (debate, critic) = tokio::join!(
            self.run_parliament(decision, &result.assessments),
            self.run_critic(decision, &result.assessments),
        );
        match debate {
            Ok(debate) => result.debate = Some(debate),
            Err(err) => {
                warn!("Parliament failed: {}", err);
                failures.push(("parliament".to_string(), err));
            }
        }
        match critic {
            Ok(report) => result.critic_report = Some(report),
            Err(err) => {
                warn!("Critic failed: {}", err);
                failures.push(("critic".to_string(), err));
            }
        }

        // Phase 3: synthesizer, only when a ministry offered an alternative
        let has_proposals = result
            .assessments
            .iter()
            .any(|a| a.counter_proposal.is_some());
        if has_proposals {
            match self.run_synthesizer(decision, &result).await {
                Ok(proposal) => result.counter_proposal = Some(proposal),
                Err(err) => {
                    warn!("Synthesizer failed: {}", err);
                    failures.push(("synthesizer".to_string(), err));
                }
            }
        }

        Ok(PipelineOutcome { result, failures })
    }

    fn ministry_request(&self, profile: &MinistryProfile, decision: &Decision) -> AgentRequest {
        let full_text_line = if decision.full_text.is_empty() {
            String::new()
        } else {
            format!("Full text: {}\n", decision.full_text)
        };
        let user_prompt = format!(
            "Analyze the following government decision from the perspective of \
             the Ministry of {}.\n\n\
             Decision: {}\n\
             Date: {}\n\
             Summary: {}\n\
             {}\n\
             Focus on: {}\n\n\
             Return a single JSON object with fields: verdict \
             (strongly_positive|positive|neutral|negative|strongly_negative), \
             score (integer 1-10), summary, executive_summary, reasoning, \
             key_concerns (array), recommendations (array), and optionally \
             counter_proposal {{title, summary, key_changes, expected_benefits, \
             estimated_feasibility}}.",
            profile.ministry,
            decision.title,
            decision.date,
            decision.summary,
            full_text_line,
            profile.focus_areas.join(", "),
        );
        AgentRequest::new(&profile.system_prompt, &user_prompt, &self.model)
            .with_effort(Effort::Medium)
            .with_timeout(self.timeout)
    }

    async fn run_parliament(
        &self,
        decision: &Decision,
        assessments: &[Assessment],
    ) -> Result<ParliamentDebate> {
        let assessments_json = serde_json::to_string_pretty(assessments)?;
        let user_prompt = format!(
            "The cabinet has assessed this decision:\n\nDecision: {}\n\n\
             Ministry assessments:\n{}\n\n\
             Simulate the parliamentary debate and return a single JSON object \
             with fields: consensus_summary, disagreements (array), \
             overall_verdict (same enum as the assessments), debate_transcript.",
            decision.title, assessments_json,
        );
        let request = AgentRequest::new(&self.parliament_prompt, &user_prompt, &self.model)
            .with_timeout(self.timeout);
        let outcome = self.runner.run(&request).await?;
        let mut value = extract_json_object(&outcome.text)
            .ok_or_else(|| CabinetError::AgentParse("parliament output has no JSON".into()))?;
        inject_decision_id(&mut value, &decision.id);
        serde_json::from_value(value)
            .map_err(|e| CabinetError::AgentParse(format!("parliament: {}", e)))
    }

    async fn run_critic(
        &self,
        decision: &Decision,
        assessments: &[Assessment],
    ) -> Result<CriticReport> {
        let assessments_json = serde_json::to_string_pretty(assessments)?;
        let user_prompt = format!(
            "Review this decision and how well the ministries analyzed it.\n\n\
             Decision: {}\nSummary: {}\n\nMinistry assessments:\n{}\n\n\
             Return a single JSON object with fields: decision_score (1-10), \
             assessment_quality_score (1-10), blind_spots (array), \
             overall_analysis, headline, eu_chapter_relevance (array).",
            decision.title, decision.summary, assessments_json,
        );
        let request = AgentRequest::new(&self.critic_prompt, &user_prompt, &self.model)
            .with_timeout(self.timeout);
        let outcome = self.runner.run(&request).await?;
        let mut value = extract_json_object(&outcome.text)
            .ok_or_else(|| CabinetError::AgentParse("critic output has no JSON".into()))?;
        inject_decision_id(&mut value, &decision.id);
        serde_json::from_value(value)
            .map_err(|e| CabinetError::AgentParse(format!("critic: {}", e)))
    }

    async fn run_synthesizer(
        &self,
        decision: &Decision,
        result: &SessionResult,
    ) -> Result<CounterProposal> {
        let proposals: Vec<&Assessment> = result
            .assessments
            .iter()
            .filter(|a| a.counter_proposal.is_some())
            .collect();
        let proposals_json = serde_json::to_string_pretty(&proposals)?;
        let debate_section = match &result.debate {
            Some(debate) => format!(
                "Parliament consensus: {}\nOverall verdict: {}\n",
                debate.consensus_summary, debate.overall_verdict
            ),
            None => String::new(),
        };
        let user_prompt = format!(
            "Synthesize one unified counter-proposal for this decision.\n\n\
             Decision: {}\n{}\n\
             Ministry counter-proposals:\n{}\n\n\
             Return a single JSON object with fields: title, executive_summary, \
             detailed_proposal, ministry_contributions (array), key_differences \
             (array), implementation_steps (array), risks_and_tradeoffs (array).",
            decision.title, debate_section, proposals_json,
        );
        let request = AgentRequest::new(&self.synthesizer_prompt, &user_prompt, &self.model)
            .with_timeout(self.timeout);
        let outcome = self.runner.run(&request).await?;
        let mut value = extract_json_object(&outcome.text)
            .ok_or_else(|| CabinetError::AgentParse("synthesizer output has no JSON".into()))?;
        inject_decision_id(&mut value, &decision.id);
        serde_json::from_value(value)
            .map_err(|e| CabinetError::AgentParse(format!("synthesizer: {}", e)))
    }
}

fn inject_decision_id(value: &mut Value, decision_id: &str) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("decision_id".to_string(), Value::from(decision_id));
    }
}

/// Parse a ministry's output into an Assessment.
///
/// Parse failures are recovered with a neutral default; this is the only
/// place in the engine where that happens.
fn parse_assessment(text: &str, ministry: Ministry, decision_id: &str) -> Result<Assessment> {
    let Some(mut value) = extract_json_object(text) else {
        warn!("Ministry {}: no JSON in output, using neutral fallback", ministry);
        return Ok(Assessment::neutral_fallback(ministry, decision_id));
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "ministry".to_string(),
            serde_json::to_value(ministry).expect("ministry serializes"),
        );
        obj.insert("decision_id".to_string(), Value::from(decision_id));
        // Clamp out-of-range scores instead of dropping the whole assessment
        if let Some(score) = obj.get("score").and_then(Value::as_i64) {
            obj.insert(
                "score".to_string(),
                Value::from(Assessment::clamp_score(score)),
            );
        }
        // An unknown verdict is a schema violation; neutral keeps the closed set
        if let Some(verdict) = obj.get("verdict") {
            if serde_json::from_value::<Verdict>(verdict.clone()).is_err() {
                obj.insert(
                    "verdict".to_string(),
                    serde_json::to_value(Verdict::Neutral).expect("verdict serializes"),
                );
            }
        }
    }
    match serde_json::from_value::<Assessment>(value) {
        Ok(assessment) => Ok(assessment),
        Err(err) => {
            warn!(
                "Ministry {}: schema mismatch ({}), using neutral fallback",
                ministry, err
            );
            Ok(Assessment::neutral_fallback(ministry, decision_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::ministry_roster;
    use cabinet_agent::MockAgentRunner;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn sample_decision() -> Decision {
        Decision {
            id: "news-2026-03-15-0a1b2c3d".to_string(),
            title: "New VAT rate".to_string(),
            summary: "VAT raised to 23%".to_string(),
            full_text: String::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
            source_url: String::new(),
            category: cabinet_core::Category::Fiscal,
            tags: Vec::new(),
            title_translated: None,
            summary_translated: None,
        }
    }

    fn pipeline(runner: MockAgentRunner) -> Pipeline<MockAgentRunner> {
        Pipeline::new(
            Arc::new(runner),
            ministry_roster(&PathBuf::from("/nonexistent")),
            "parliament prompt".to_string(),
            "critic prompt".to_string(),
            "synthesizer prompt".to_string(),
            "test-model".to_string(),
            Duration::from_secs(60),
        )
    }

    fn ministry_json(score: u8) -> String {
        format!(
            r#"{{"verdict": "positive", "score": {}, "summary": "s",
                "reasoning": "r", "key_concerns": [], "recommendations": []}}"#,
            score
        )
    }

    const PARLIAMENT_JSON: &str = r#"{"consensus_summary": "agree",
        "disagreements": [], "overall_verdict": "positive", "debate_transcript": "t"}"#;
    const CRITIC_JSON: &str = r#"{"decision_score": 6, "assessment_quality_score": 7,
        "blind_spots": [], "overall_analysis": "a", "headline": "h",
        "eu_chapter_relevance": []}"#;

    #[tokio::test]
    async fn test_happy_path_produces_ordered_assessments() {
        let runner = MockAgentRunner::new()
            .respond("Simulate the parliamentary debate", PARLIAMENT_JSON)
            .respond("how well the ministries analyzed it", CRITIC_JSON)
            .with_default(&ministry_json(7));
        let pipeline = pipeline(runner);

        let outcome = pipeline.analyze(&sample_decision()).await.unwrap();
        assert_eq!(outcome.result.assessments.len(), 9);
        assert!(outcome.failures.is_empty());
        let order: Vec<Ministry> = outcome.result.assessments.iter().map(|a| a.ministry).collect();
        assert_eq!(order, Ministry::ALL.to_vec());
        assert!(outcome.result.debate.is_some());
        assert!(outcome.result.critic_report.is_some());
        // No ministry offered a counter-proposal, so the synthesizer is skipped
        assert!(outcome.result.counter_proposal.is_none());
    }

    #[tokio::test]
    async fn test_single_ministry_failure_is_tolerated() {
        let runner = MockAgentRunner::new()
            .fail_timeout("Ministry of Finance")
            .respond("Simulate the parliamentary debate", PARLIAMENT_JSON)
            .respond("how well the ministries analyzed it", CRITIC_JSON)
            .with_default(&ministry_json(5));
        let pipeline = pipeline(runner);

        let outcome = pipeline.analyze(&sample_decision()).await.unwrap();
        assert_eq!(outcome.result.assessments.len(), 8);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "ministry:finance");
        assert!(!outcome
            .result
            .assessments
            .iter()
            .any(|a| a.ministry == Ministry::Finance));
    }

    #[tokio::test]
    async fn test_all_ministries_failing_is_analysis_empty() {
        let runner = MockAgentRunner::new().fail_exec("Analyze the following", "boom");
        let pipeline = pipeline(runner);

        let err = pipeline.analyze(&sample_decision()).await.unwrap_err();
        assert_eq!(err.kind(), "AnalysisEmpty");
    }

    #[tokio::test]
    async fn test_unparseable_ministry_gets_neutral_fallback() {
        let runner = MockAgentRunner::new()
            .respond("Ministry of Finance", "I decline to answer in JSON.")
            .respond("Simulate the parliamentary debate", PARLIAMENT_JSON)
            .respond("how well the ministries analyzed it", CRITIC_JSON)
            .with_default(&ministry_json(5));
        let pipeline = pipeline(runner);

        let outcome = pipeline.analyze(&sample_decision()).await.unwrap();
        assert_eq!(outcome.result.assessments.len(), 9);
        let finance = outcome
            .result
            .assessments
            .iter()
            .find(|a| a.ministry == Ministry::Finance)
            .unwrap();
        assert_eq!(finance.verdict, Verdict::Neutral);
        assert_eq!(finance.score, 5);
    }

    #[tokio::test]
    async fn test_synthesizer_runs_when_counter_proposal_present() {
        let with_proposal = r#"{"verdict": "negative", "score": 3, "summary": "s",
            "reasoning": "r", "counter_proposal": {"title": "alt", "summary": "a"}}"#;
        let synth_json = r#"{"title": "unified", "executive_summary": "e",
            "detailed_proposal": "d", "ministry_contributions": ["Finance"],
            "key_differences": [], "implementation_steps": [], "risks_and_tradeoffs": []}"#;
        let runner = MockAgentRunner::new()
            .respond("Ministry of Finance", with_proposal)
            .respond("Simulate the parliamentary debate", PARLIAMENT_JSON)
            .respond("how well the ministries analyzed it", CRITIC_JSON)
            .respond("Synthesize one unified counter-proposal", synth_json)
            .with_default(&ministry_json(6));
        let pipeline = pipeline(runner);

        let outcome = pipeline.analyze(&sample_decision()).await.unwrap();
        let proposal = outcome.result.counter_proposal.unwrap();
        assert_eq!(proposal.title, "unified");
        assert_eq!(proposal.decision_id, outcome.result.decision.id);
    }

    #[tokio::test]
    async fn test_parliament_failure_leaves_debate_none() {
        let runner = MockAgentRunner::new()
            .fail_exec("Simulate the parliamentary debate", "crash")
            .respond("how well the ministries analyzed it", CRITIC_JSON)
            .with_default(&ministry_json(6));
        let pipeline = pipeline(runner);

        let outcome = pipeline.analyze(&sample_decision()).await.unwrap();
        assert!(outcome.result.debate.is_none());
        assert!(outcome.result.critic_report.is_some());
        assert!(outcome.failures.iter().any(|(phase, _)| phase == "parliament"));
    }

    #[test]
    fn test_out_of_range_score_is_clamped() {
        let text = r#"{"verdict": "positive", "score": 14, "summary": "s", "reasoning": "r"}"#;
        let assessment =
            parse_assessment(text, Ministry::Economy, "news-2026-01-01-00000000").unwrap();
        assert_eq!(assessment.score, 10);
    }

    #[test]
    fn test_unknown_verdict_becomes_neutral() {
        let text = r#"{"verdict": "meh", "score": 5, "summary": "s", "reasoning": "r"}"#;
        let assessment =
            parse_assessment(text, Ministry::Economy, "news-2026-01-01-00000000").unwrap();
        assert_eq!(assessment.verdict, Verdict::Neutral);
    }
}
