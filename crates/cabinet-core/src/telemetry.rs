//! Telemetry records: one JSON line per cycle, plus structured runtime errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CabinetError;

/// Observable public output of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YieldKind {
    #[default]
    None,
    PrMerged,
    AnalysisPublished,
}

/// Structured error attached to a failed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub kind: String,
    pub message: String,
    /// Truncated stack/context, capped by the writer
    #[serde(default)]
    pub stack: String,
}

impl PhaseError {
    const MAX_STACK: usize = 2000;

    pub fn from_error(err: &CabinetError) -> Self {
        let stack: String = format!("{:?}", err).chars().take(Self::MAX_STACK).collect();
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            stack,
        }
    }
}

/// One executed action within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePhaseResult {
    pub action: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PhaseError>,
}

/// One telemetry entry per main-loop cycle, serialized as JSONL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleTelemetry {
    pub cycle_number: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub productive: bool,
    #[serde(default)]
    pub yield_kind: YieldKind,
    #[serde(default)]
    pub phases: Vec<CyclePhaseResult>,
    #[serde(default)]
    pub conductor_reasoning: String,
    #[serde(default)]
    pub conductor_actions: Vec<String>,
    #[serde(default)]
    pub conductor_fallback: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl CycleTelemetry {
    pub fn new(cycle_number: u64, dry_run: bool) -> Self {
        Self {
            cycle_number,
            started_at: Utc::now(),
            ended_at: None,
            productive: false,
            yield_kind: YieldKind::None,
            phases: Vec::new(),
            conductor_reasoning: String::new(),
            conductor_actions: Vec::new(),
            conductor_fallback: false,
            dry_run,
        }
    }

    /// Close the record: stamp `ended_at` and derive `productive`.
    pub fn finish(&mut self, yield_kind: YieldKind) {
        self.yield_kind = yield_kind;
        self.productive = yield_kind != YieldKind::None;
        self.ended_at = Some(Utc::now());
    }
}

/// One structured runtime error, serialized as JSONL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub stack: String,
}

impl ErrorEntry {
    pub fn from_error(step: &str, err: &CabinetError) -> Self {
        let phase = PhaseError::from_error(err);
        Self {
            timestamp: Utc::now(),
            step: step.to_string(),
            issue_number: None,
            pr_number: None,
            kind: phase.kind,
            message: phase.message,
            stack: phase.stack,
        }
    }

    pub fn with_issue(mut self, issue_number: u64) -> Self {
        self.issue_number = Some(issue_number);
        self
    }

    pub fn with_pr(mut self, pr_number: u64) -> Self {
        self.pr_number = Some(pr_number);
        self
    }
}
