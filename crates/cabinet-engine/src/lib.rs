//! # cabinet-engine
//!
//! The cycle engine. Each cycle: gather state from the tracker and local
//! journals, ask the Conductor for a plan, dispatch the plan's actions, write
//! one telemetry record, run the mechanical circuit breaker, cool down.
//!
//! Scheduling is single-threaded cooperative at the engine level: one cycle
//! at a time, with bounded parallel fan-out only inside the analysis
//! pipeline. No tracker state is cached across cycle boundaries.

mod backlog;
mod breaker;
mod conductor;
mod cycle;
mod debate;
mod dispatcher;
mod engine;
mod intake;
mod journal;
mod oversight;
mod pr_workflow;
mod reexec;

pub use backlog::pick;
pub use breaker::check_error_patterns;
pub use conductor::{default_plan, gather_context, plan_cycle, ConductorContext};
pub use cycle::{run_cycle, CycleOutcome};
pub use debate::{run_debate, DebateVerdict};
pub use dispatcher::dispatch;
pub use engine::Engine;
pub use intake::{
    create_analysis_issue, decision_from_issue_body, should_fetch_news, step_fetch_news,
    NewsScoutState,
};
pub use journal::{
    append_error_entry, append_journal, append_telemetry, load_errors, load_journal,
    load_telemetry, JournalEntry,
};
pub use oversight::{
    news_ran_today, research_scout_due, step_director, step_editorial_review, step_propose,
    step_research_scout, step_strategic_director, EditorialReview, ResearchScoutState,
};
pub use pr_workflow::{run_pr_workflow, RoundLog, WorkflowOutcome};
pub use reexec::{commit_output_data, pull_latest, reexec};
