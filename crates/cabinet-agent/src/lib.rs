//! # cabinet-agent
//!
//! Spawns LLM agents as isolated subprocesses and collects their final
//! assistant text.
//!
//! Key design: every invocation is a fresh process with no shared state.
//! Continuity comes from tracker records and journals, never from an agent's
//! conversation history. Streams are always drained to EOF and the child is
//! reaped on every path, including timeout.

mod json;
mod runner;

pub use json::{extract_json_array, extract_json_object};
pub use runner::{
    AgentOutcome, AgentRequest, AgentRunner, Effort, MockAgentRunner, SubprocessRunner,
};
