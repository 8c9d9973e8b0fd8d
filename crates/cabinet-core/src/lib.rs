//! # cabinet-core
//!
//! Core types for the Cabinet engine: the autonomous loop that analyzes
//! government decisions through a cabinet of ministry agents and drives its
//! own improvement backlog through an issue tracker.
//!
//! ## Core paradigm
//!
//! - All durable coordination state lives in the tracker (issues, labels, PRs)
//! - The engine holds only transient views; each cycle re-queries what it needs
//! - Components return structured errors; only the binary's top level exits
//! - Local persistence is limited to small append-only journals

mod config;
mod error;
mod labels;
mod plan;
mod session;
mod telemetry;
mod tracker;

pub use config::EngineConfig;
pub use error::{CabinetError, Result};
pub use labels::*;
pub use plan::{Action, ConductorPlan, PlanValidationError, MAX_PLAN_ACTIONS};
pub use session::*;
pub use telemetry::*;
pub use tracker::*;
