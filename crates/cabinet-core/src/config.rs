//! Engine configuration, constructed once per process and passed explicitly.

use std::path::PathBuf;

/// Configuration for the cycle engine.
///
/// Built from CLI flags plus a handful of environment variables; nothing in
/// the engine reads process-wide state after construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Workspace root (repository checkout the engine operates in)
    pub workspace_root: PathBuf,
    /// Model id passed through to agents (opaque to the engine)
    pub model: String,
    /// Path of the agent binary to spawn
    pub agent_bin: String,
    /// Seconds between cycles when the Conductor does not override
    pub cooldown_seconds: u64,
    /// Maximum cycles to run; 0 = unlimited
    pub max_cycles: u64,
    /// Maximum coder-reviewer rounds per PR
    pub max_pr_rounds: u32,
    /// Run the project director every N productive cycles; 0 = disabled
    pub director_interval: u64,
    /// Run the strategic director every N productive cycles; 0 = disabled
    pub strategic_director_interval: u64,
    /// Days between research scout runs
    pub research_interval_days: i64,
    /// Debate judge threshold: accept iff strength - weakness >= threshold
    pub debate_threshold: i64,
    /// News intake cap per day
    pub news_cap_per_day: usize,
    /// Hard cap on issues filed per director invocation
    pub director_issue_cap: usize,
    /// Wall-clock timeout per agent invocation, in seconds
    pub agent_timeout_seconds: u64,
    pub dry_run: bool,
    pub skip_analysis: bool,
    pub skip_improve: bool,
    pub skip_research: bool,
    /// Social posting is enabled only when credentials are present in the
    /// environment; absence is never an error.
    pub social_posting_enabled: bool,
    /// Disable the self-restart sequence between cycles
    pub no_reexec: bool,
}

impl EngineConfig {
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-5";
    pub const DEFAULT_COOLDOWN_SECONDS: u64 = 60;
    pub const DEFAULT_MAX_PR_ROUNDS: u32 = 3;
    pub const DEFAULT_DIRECTOR_INTERVAL: u64 = 5;
    pub const DEFAULT_STRATEGIC_INTERVAL: u64 = 10;
    pub const DEFAULT_RESEARCH_INTERVAL_DAYS: i64 = 7;
    pub const DEFAULT_DEBATE_THRESHOLD: i64 = 2;
    pub const DEFAULT_NEWS_CAP_PER_DAY: usize = 3;
    pub const DEFAULT_DIRECTOR_ISSUE_CAP: usize = 2;
    pub const DEFAULT_AGENT_TIMEOUT_SECONDS: u64 = 900;

    // Derived paths (all relative to the workspace root)

    pub fn data_dir(&self) -> PathBuf {
        self.workspace_root.join("output").join("data")
    }

    pub fn analyses_dir(&self) -> PathBuf {
        self.data_dir().join("analyses")
    }

    pub fn analyses_index_path(&self) -> PathBuf {
        self.data_dir().join("analyses-index.json")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.data_dir().join("telemetry.jsonl")
    }

    pub fn errors_path(&self) -> PathBuf {
        self.data_dir().join("errors.jsonl")
    }

    pub fn conductor_journal_path(&self) -> PathBuf {
        self.data_dir().join("conductor_journal.jsonl")
    }

    pub fn news_scout_state_path(&self) -> PathBuf {
        self.workspace_root.join("output").join("news_scout_state.json")
    }

    pub fn research_scout_state_path(&self) -> PathBuf {
        self.workspace_root
            .join("output")
            .join("research_scout_state.json")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.workspace_root.join("prompts")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            model: Self::DEFAULT_MODEL.to_string(),
            agent_bin: "claude".to_string(),
            cooldown_seconds: Self::DEFAULT_COOLDOWN_SECONDS,
            max_cycles: 0,
            max_pr_rounds: Self::DEFAULT_MAX_PR_ROUNDS,
            director_interval: Self::DEFAULT_DIRECTOR_INTERVAL,
            strategic_director_interval: Self::DEFAULT_STRATEGIC_INTERVAL,
            research_interval_days: Self::DEFAULT_RESEARCH_INTERVAL_DAYS,
            debate_threshold: Self::DEFAULT_DEBATE_THRESHOLD,
            news_cap_per_day: Self::DEFAULT_NEWS_CAP_PER_DAY,
            director_issue_cap: Self::DEFAULT_DIRECTOR_ISSUE_CAP,
            agent_timeout_seconds: Self::DEFAULT_AGENT_TIMEOUT_SECONDS,
            dry_run: false,
            skip_analysis: false,
            skip_improve: false,
            skip_research: false,
            social_posting_enabled: false,
            no_reexec: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let config = EngineConfig {
            workspace_root: PathBuf::from("/work"),
            ..Default::default()
        };
        assert_eq!(
            config.telemetry_path(),
            PathBuf::from("/work/output/data/telemetry.jsonl")
        );
        assert_eq!(
            config.news_scout_state_path(),
            PathBuf::from("/work/output/news_scout_state.json")
        );
        assert_eq!(
            config.analyses_dir(),
            PathBuf::from("/work/output/data/analyses")
        );
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_pr_rounds, 3);
        assert_eq!(config.debate_threshold, 2);
        assert_eq!(config.news_cap_per_day, 3);
        assert!(!config.dry_run);
    }
}
