//! Domain models for decisions, ministry assessments, and session results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Decision category (closed set; unknown values fail deserialization)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Fiscal,
    Legal,
    Eu,
    Health,
    Security,
    Education,
    Economy,
    Tourism,
    Environment,
    #[default]
    General,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fiscal => write!(f, "fiscal"),
            Self::Legal => write!(f, "legal"),
            Self::Eu => write!(f, "eu"),
            Self::Health => write!(f, "health"),
            Self::Security => write!(f, "security"),
            Self::Education => write!(f, "education"),
            Self::Economy => write!(f, "economy"),
            Self::Tourism => write!(f, "tourism"),
            Self::Environment => write!(f, "environment"),
            Self::General => write!(f, "general"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fiscal" => Ok(Self::Fiscal),
            "legal" => Ok(Self::Legal),
            "eu" => Ok(Self::Eu),
            "health" => Ok(Self::Health),
            "security" => Ok(Self::Security),
            "education" => Ok(Self::Education),
            "economy" => Ok(Self::Economy),
            "tourism" => Ok(Self::Tourism),
            "environment" => Ok(Self::Environment),
            "general" => Ok(Self::General),
            _ => Err(format!("Invalid category: {}", s)),
        }
    }
}

/// An external news item to be analyzed by the cabinet.
///
/// The `id` is stable across restarts: `news-{date}-{sha256(title)[..8]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub full_text: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Translated title (populated by a localization step, if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_translated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_translated: Option<String>,
}

/// Ministry roles (closed set). `ALL` defines the canonical order used when
/// sorting assessments into a [`SessionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ministry {
    Finance,
    Justice,
    EuIntegration,
    Health,
    Interior,
    Education,
    Economy,
    Tourism,
    Environment,
}

impl Ministry {
    pub const ALL: [Ministry; 9] = [
        Ministry::Finance,
        Ministry::Justice,
        Ministry::EuIntegration,
        Ministry::Health,
        Ministry::Interior,
        Ministry::Education,
        Ministry::Economy,
        Ministry::Tourism,
        Ministry::Environment,
    ];

    /// Position in the canonical ordering.
    pub fn rank(&self) -> usize {
        Self::ALL.iter().position(|m| m == self).unwrap_or(usize::MAX)
    }

    /// Short slug used in prompt file names.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Finance => "finance",
            Self::Justice => "justice",
            Self::EuIntegration => "eu_integration",
            Self::Health => "health",
            Self::Interior => "interior",
            Self::Education => "education",
            Self::Economy => "economy",
            Self::Tourism => "tourism",
            Self::Environment => "environment",
        }
    }
}

impl std::fmt::Display for Ministry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finance => write!(f, "Finance"),
            Self::Justice => write!(f, "Justice"),
            Self::EuIntegration => write!(f, "EU Integration"),
            Self::Health => write!(f, "Health"),
            Self::Interior => write!(f, "Interior"),
            Self::Education => write!(f, "Education"),
            Self::Economy => write!(f, "Economy"),
            Self::Tourism => write!(f, "Tourism"),
            Self::Environment => write!(f, "Environment"),
        }
    }
}

/// Verdict on a decision (closed set)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    StronglyPositive,
    Positive,
    #[default]
    Neutral,
    Negative,
    StronglyNegative,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StronglyPositive => write!(f, "strongly_positive"),
            Self::Positive => write!(f, "positive"),
            Self::Neutral => write!(f, "neutral"),
            Self::Negative => write!(f, "negative"),
            Self::StronglyNegative => write!(f, "strongly_negative"),
        }
    }
}

/// A ministry's alternative proposal for a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinistryCounterProposal {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub key_changes: Vec<String>,
    #[serde(default)]
    pub expected_benefits: Vec<String>,
    #[serde(default)]
    pub estimated_feasibility: String,
}

/// One ministry's assessment of a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub ministry: Ministry,
    pub decision_id: String,
    pub verdict: Verdict,
    /// Score from 1 (worst) to 10 (best)
    pub score: u8,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executive_summary: Option<String>,
    pub reasoning: String,
    #[serde(default)]
    pub key_concerns: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_proposal: Option<MinistryCounterProposal>,
}

impl Assessment {
    /// Clamp the score into the valid 1..=10 range.
    pub fn clamp_score(score: i64) -> u8 {
        score.clamp(1, 10) as u8
    }

    /// Neutral fallback used when an agent's output could not be parsed.
    /// This is the only place in the engine where a parse error is recovered.
    pub fn neutral_fallback(ministry: Ministry, decision_id: &str) -> Self {
        Self {
            ministry,
            decision_id: decision_id.to_string(),
            verdict: Verdict::Neutral,
            score: 5,
            summary: format!("Assessment by {} could not be fully parsed.", ministry),
            executive_summary: None,
            reasoning: "No structured response received.".to_string(),
            key_concerns: vec!["Response parsing failed".to_string()],
            recommendations: vec!["Re-run assessment".to_string()],
            counter_proposal: None,
        }
    }
}

/// Synthesized parliamentary debate across all ministry assessments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParliamentDebate {
    pub decision_id: String,
    pub consensus_summary: String,
    #[serde(default)]
    pub disagreements: Vec<String>,
    pub overall_verdict: Verdict,
    pub debate_transcript: String,
}

/// Independent critic's report on a decision and its assessments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticReport {
    pub decision_id: String,
    pub decision_score: u8,
    pub assessment_quality_score: u8,
    #[serde(default)]
    pub blind_spots: Vec<String>,
    pub overall_analysis: String,
    pub headline: String,
    #[serde(default)]
    pub eu_chapter_relevance: Vec<String>,
}

/// Unified counter-proposal synthesized from the ministries' alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterProposal {
    pub decision_id: String,
    pub title: String,
    pub executive_summary: String,
    pub detailed_proposal: String,
    #[serde(default)]
    pub ministry_contributions: Vec<String>,
    #[serde(default)]
    pub key_differences: Vec<String>,
    #[serde(default)]
    pub implementation_steps: Vec<String>,
    #[serde(default)]
    pub risks_and_tradeoffs: Vec<String>,
}

/// Complete result of a cabinet session for one decision.
///
/// Assessments are kept sorted in [`Ministry::ALL`] order so downstream
/// hashing and rendering are reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResult {
    pub decision: Decision,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate: Option<ParliamentDebate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critic_report: Option<CriticReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_proposal: Option<CounterProposal>,
    /// Tracker issue that requested this analysis, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
}

impl SessionResult {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            assessments: Vec::new(),
            debate: None,
            critic_report: None,
            counter_proposal: None,
            issue_number: None,
        }
    }

    /// Sort assessments into canonical ministry order.
    pub fn sort_assessments(&mut self) {
        self.assessments.sort_by_key(|a| a.ministry.rank());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_decision() -> Decision {
        Decision {
            id: "news-2026-03-15-0a1b2c3d".to_string(),
            title: "New VAT rate".to_string(),
            summary: "VAT raised to 23%".to_string(),
            full_text: String::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
            source_url: "https://example.me/vat".to_string(),
            category: Category::Fiscal,
            tags: vec!["tax".to_string()],
            title_translated: None,
            summary_translated: None,
        }
    }

    #[test]
    fn test_category_parse_rejects_unknown() {
        assert!("fiscal".parse::<Category>().is_ok());
        assert!("FISCAL".parse::<Category>().is_ok());
        assert!("banking".parse::<Category>().is_err());
        // Unknown enum values also fail at the serde layer
        assert!(serde_json::from_str::<Category>("\"banking\"").is_err());
    }

    #[test]
    fn test_ministry_order_is_canonical() {
        let ranks: Vec<usize> = Ministry::ALL.iter().map(|m| m.rank()).collect();
        assert_eq!(ranks, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_assessments_into_ministry_order() {
        let mut result = SessionResult::new(sample_decision());
        for ministry in [Ministry::Environment, Ministry::Finance, Ministry::Health] {
            result
                .assessments
                .push(Assessment::neutral_fallback(ministry, &result.decision.id));
        }
        result.sort_assessments();
        let order: Vec<Ministry> = result.assessments.iter().map(|a| a.ministry).collect();
        assert_eq!(
            order,
            vec![Ministry::Finance, Ministry::Health, Ministry::Environment]
        );
    }

    #[test]
    fn test_session_result_round_trips() {
        let mut result = SessionResult::new(sample_decision());
        result
            .assessments
            .push(Assessment::neutral_fallback(Ministry::Finance, &result.decision.id));
        result.debate = Some(ParliamentDebate {
            decision_id: result.decision.id.clone(),
            consensus_summary: "broad agreement".to_string(),
            disagreements: vec!["timing".to_string()],
            overall_verdict: Verdict::Negative,
            debate_transcript: "...".to_string(),
        });
        result.issue_number = Some(42);

        let json = serde_json::to_string(&result).unwrap();
        let back: SessionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let json = r#"{
            "ministry": "finance",
            "decision_id": "news-2026-03-15-0a1b2c3d",
            "verdict": "positive",
            "score": 7,
            "summary": "fine",
            "reasoning": "because",
            "future_field": "ignored"
        }"#;
        let assessment: Assessment = serde_json::from_str(json).unwrap();
        assert_eq!(assessment.score, 7);
    }

    #[test]
    fn test_unknown_verdict_fails() {
        assert!(serde_json::from_str::<Verdict>("\"lukewarm\"").is_err());
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(Assessment::clamp_score(0), 1);
        assert_eq!(Assessment::clamp_score(5), 5);
        assert_eq!(Assessment::clamp_score(99), 10);
    }
}
