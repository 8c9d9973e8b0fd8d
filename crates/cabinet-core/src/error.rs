//! Unified error types for Cabinet

use thiserror::Error;

/// Unified error type for all Cabinet operations
#[derive(Error, Debug)]
pub enum CabinetError {
    // Agent subprocess errors
    #[error("agent timed out after {seconds}s")]
    AgentTimeout {
        seconds: u64,
        /// Text collected before the deadline, if any
        partial: String,
    },

    #[error("agent execution failed: {0}")]
    AgentExec(String),

    #[error("agent produced no extractable text")]
    AgentEmpty,

    #[error("agent output did not match the expected schema: {0}")]
    AgentParse(String),

    // Tracker errors
    #[error("transient tracker error: {0}")]
    TrackerTransient(String),

    #[error("tracker error: {0}")]
    TrackerFatal(String),

    #[error("label transition precondition not met: {0}")]
    StateConflict(String),

    // Pipeline errors
    #[error("no ministry produced an assessment for decision {0}")]
    AnalysisEmpty(String),

    // I/O and serialization
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl CabinetError {
    /// Stable error-kind string used in telemetry and by the circuit breaker.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentTimeout { .. } => "AgentTimeout",
            Self::AgentExec(_) => "AgentExecError",
            Self::AgentEmpty => "AgentEmpty",
            Self::AgentParse(_) => "AgentParseError",
            Self::TrackerTransient(_) => "TrackerTransient",
            Self::TrackerFatal(_) => "TrackerFatal",
            Self::StateConflict(_) => "StateConflict",
            Self::AnalysisEmpty(_) => "AnalysisEmpty",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Other(_) => "Other",
        }
    }
}

/// Result type alias using CabinetError
pub type Result<T> = std::result::Result<T, CabinetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(
            CabinetError::AgentTimeout {
                seconds: 30,
                partial: String::new()
            }
            .kind(),
            "AgentTimeout"
        );
        assert_eq!(CabinetError::AgentExec("x".into()).kind(), "AgentExecError");
        assert_eq!(CabinetError::AgentEmpty.kind(), "AgentEmpty");
        assert_eq!(
            CabinetError::TrackerTransient("x".into()).kind(),
            "TrackerTransient"
        );
        assert_eq!(
            CabinetError::AnalysisEmpty("news-2026-01-01-deadbeef".into()).kind(),
            "AnalysisEmpty"
        );
    }
}
