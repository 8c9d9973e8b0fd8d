//! # cabinet-tracker
//!
//! GitHub adapter for the Cabinet engine. All issue, label, PR, and CI
//! operations go through the `gh` CLI (plus `git` for branch work), wrapped
//! behind the [`GhExecutor`] trait so tests can script responses without a
//! network or a repository.
//!
//! Transient failures (rate limits, 5xx, network timeouts) are retried with
//! exponential backoff; everything else fails fast as `TrackerFatal`.

mod ci;
mod command;
mod issues;
mod labels;
mod prs;
mod retry;

pub use ci::CiManager;
pub use command::{GhCli, GhExecutor, GhOutput, MockGhExecutor};
pub use issues::IssueManager;
pub use labels::ensure_labels;
pub use prs::PrManager;
pub use retry::exec_with_retry;
