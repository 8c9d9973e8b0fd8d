//! Retry policy for transient tracker failures.

use cabinet_core::{CabinetError, Result};
use std::time::Duration;
use tracing::warn;

use crate::command::{GhExecutor, GhOutput};

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

/// Whether a failed command looks retriable from its stderr.
fn is_transient(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("http 5")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("timeout")
        || lower.contains("connection reset")
        || lower.contains("could not resolve host")
        || lower.contains("temporarily unavailable")
}

/// A `Retry-After: N` hint embedded in stderr, if any.
fn retry_after_secs(stderr: &str) -> Option<u64> {
    let lower = stderr.to_lowercase();
    let pos = lower.find("retry-after:")?;
    lower[pos + "retry-after:".len()..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()
}

/// Execute a tracker command, retrying transient failures with exponential
/// backoff.
///
/// Non-retriable failures are `TrackerFatal`. A transient failure that
/// persists through every attempt stays `TrackerTransient`, so telemetry
/// keeps persistent throttling distinguishable from hard failures.
pub async fn exec_with_retry<E: GhExecutor>(executor: &E, args: &[&str]) -> Result<GhOutput> {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;

    for attempt in 1..=MAX_ATTEMPTS {
        let output = executor.exec(args).await?;
        if output.success {
            return Ok(output);
        }

        if !is_transient(&output.stderr) {
            return Err(CabinetError::TrackerFatal(format!(
                "{}: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }

        if attempt == MAX_ATTEMPTS {
            return Err(CabinetError::TrackerTransient(format!(
                "transient error persisted after {} attempts: {}",
                MAX_ATTEMPTS,
                output.stderr.trim()
            )));
        }

        let wait_secs = retry_after_secs(&output.stderr).unwrap_or(backoff_secs);
        warn!(
            "Tracker call failed transiently (attempt {}/{}), retrying in {}s: {}",
            attempt,
            MAX_ATTEMPTS,
            wait_secs,
            output.stderr.trim()
        );
        tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
    }

    unreachable!("retry loop returns on every path")
}
