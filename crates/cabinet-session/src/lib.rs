//! # cabinet-session
//!
//! The analysis pipeline: one decision in, one [`cabinet_core::SessionResult`]
//! out, through a three-phase DAG.
//!
//! 1. All ministry agents fan out in parallel; partial failure is tolerated.
//! 2. Parliament and critic run in parallel over the surviving assessments.
//! 3. The synthesizer runs sequentially, only when at least one ministry
//!    offered a counter-proposal.
//!
//! Assessments always appear in canonical ministry order regardless of
//! completion order, so downstream hashing and rendering are reproducible.

mod id;
mod pipeline;
mod roster;
mod store;

pub use id::decision_id;
pub use pipeline::{PhaseFailure, Pipeline, PipelineOutcome};
pub use roster::{load_role_prompt, ministry_roster, MinistryProfile};
pub use store::{load_results, rebuild_index, save_result, IndexEntry};
