//! Mechanical circuit breaker: file a stability issue when the same error
//! repeats across recent cycles. No LLM call, no cost, instant.

use std::collections::{BTreeMap, BTreeSet};

use cabinet_core::{
    CycleTelemetry, Issue, Result, LABEL_BACKLOG, LABEL_PRIORITY_HIGH, LABEL_TASK_CODE,
};
use cabinet_tracker::{GhExecutor, IssueManager};
use tracing::{debug, info};

const WINDOW: usize = 5;
const THRESHOLD: usize = 3;
const TITLE_PREFIX: &str = "stability:";

/// A recurring error signature.
type Triple = (String, String, String);

fn normalize_message(message: &str) -> String {
    let first_line = message.trim().lines().next().unwrap_or("");
    first_line.chars().take(80).collect()
}

/// Count distinct error triples across recent cycles, at most one occurrence
/// per triple per cycle.
fn count_triples(records: &[CycleTelemetry]) -> BTreeMap<Triple, usize> {
    let mut counts: BTreeMap<Triple, usize> = BTreeMap::new();
    for record in records {
        let mut seen_this_cycle: BTreeSet<Triple> = BTreeSet::new();
        for phase in &record.phases {
            let Some(error) = &phase.error else { continue };
            let triple = (
                phase.action.clone(),
                error.kind.clone(),
                normalize_message(&error.message),
            );
            if seen_this_cycle.insert(triple.clone()) {
                *counts.entry(triple).or_default() += 1;
            }
        }
    }
    counts
}

fn triple_title(triple: &Triple) -> String {
    format!("{} {} {}: {}", TITLE_PREFIX, triple.0, triple.1, triple.2)
}

/// Inspect recent telemetry and file at most one `priority:high` stability
/// issue for a triple that recurred in >= 3 of the last 5 cycles. Idempotent:
/// an existing open stability issue for the same triple suppresses filing.
pub async fn check_error_patterns<E: GhExecutor>(
    issues: &IssueManager<E>,
    telemetry: &[CycleTelemetry],
) -> Result<Option<u64>> {
    let window: Vec<CycleTelemetry> = telemetry
        .iter()
        .rev()
        .take(WINDOW)
        .rev()
        .cloned()
        .collect();
    let counts = count_triples(&window);

    for (triple, count) in counts.iter().rev() {
        if *count < THRESHOLD {
            continue;
        }
        let title = triple_title(triple);

        let existing = issues.search(TITLE_PREFIX, 20).await?;
        let already_filed = existing
            .iter()
            .filter(|i| i.open)
            .any(|i| issue_covers_triple(i, &title));
        if already_filed {
            debug!("Stability issue already open for: {}", title);
            return Ok(None);
        }

        let cycles: Vec<String> = window
            .iter()
            .filter(|record| {
                record.phases.iter().any(|phase| {
                    phase.action == triple.0
                        && phase
                            .error
                            .as_ref()
                            .is_some_and(|e| e.kind == triple.1)
                })
            })
            .map(|record| record.cycle_number.to_string())
            .collect();
        let body = format!(
            "**Auto-filed by the circuit breaker**\n\n\
             Recurring error detected in {}/{} of the last {} cycles.\n\n\
             **Phase**: `{}`\n**Kind**: `{}`\n**Message**: `{}`\n\n\
             **Affected cycles**: {}\n",
            count,
            window.len(),
            window.len(),
            triple.0,
            triple.1,
            triple.2,
            cycles.join(", "),
        );
        let number = issues
            .create(
                &title,
                &body,
                &[LABEL_PRIORITY_HIGH, LABEL_BACKLOG, LABEL_TASK_CODE],
            )
            .await?;
        info!("Circuit breaker filed stability issue #{}", number);
        return Ok(Some(number));
    }

    Ok(None)
}

fn issue_covers_triple(issue: &Issue, title: &str) -> bool {
    // Compare on a truncated prefix so small message drift does not refile
    let prefix: String = title.chars().take(60).collect();
    issue.title.starts_with(&prefix)
}
