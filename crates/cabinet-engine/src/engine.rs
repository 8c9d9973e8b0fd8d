//! Engine handle bundling config, tracker executor, and agent runner.

use std::sync::Arc;
use std::time::Duration;

use cabinet_agent::AgentRunner;
use cabinet_core::EngineConfig;
use cabinet_session::{load_role_prompt, ministry_roster, Pipeline};
use cabinet_tracker::{CiManager, GhExecutor, IssueManager, PrManager};

/// Everything a cycle needs, constructed once per process and passed
/// explicitly. Managers are cheap views over the shared executor; nothing
/// here caches tracker state.
pub struct Engine<E: GhExecutor + 'static, R: AgentRunner + 'static> {
    pub config: EngineConfig,
    executor: Arc<E>,
    runner: Arc<R>,
}

impl<E: GhExecutor + 'static, R: AgentRunner + 'static> Engine<E, R> {
    pub fn new(config: EngineConfig, executor: E, runner: R) -> Self {
        Self {
            config,
            executor: Arc::new(executor),
            runner: Arc::new(runner),
        }
    }

    pub fn executor(&self) -> Arc<E> {
        self.executor.clone()
    }

    pub fn runner(&self) -> Arc<R> {
        self.runner.clone()
    }

    pub fn issues(&self) -> IssueManager<Arc<E>> {
        IssueManager::new(self.executor.clone())
    }

    pub fn prs(&self) -> PrManager<Arc<E>> {
        PrManager::new(self.executor.clone())
    }

    pub fn ci(&self) -> CiManager<Arc<E>> {
        CiManager::new(self.executor.clone())
    }

    /// Build the analysis pipeline with prompts loaded from the workspace.
    pub fn pipeline(&self) -> Pipeline<R> {
        let prompts_dir = self.config.prompts_dir();
        Pipeline::new(
            self.runner.clone(),
            ministry_roster(&prompts_dir),
            load_role_prompt(&prompts_dir, "parliament"),
            load_role_prompt(&prompts_dir, "critic"),
            load_role_prompt(&prompts_dir, "synthesizer"),
            self.config.model.clone(),
            self.agent_timeout(),
        )
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.config.agent_timeout_seconds)
    }
}
