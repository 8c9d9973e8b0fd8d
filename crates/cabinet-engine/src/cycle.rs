//! One full engine cycle: gather, plan, dispatch, record.

use cabinet_agent::AgentRunner;
use cabinet_core::{Action, CycleTelemetry, Result};
use cabinet_tracker::{ensure_labels, GhExecutor};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::breaker::check_error_patterns;
use crate::conductor::{gather_context, plan_cycle};
use crate::dispatcher::dispatch;
use crate::engine::Engine;
use crate::journal::{append_journal, append_telemetry, load_telemetry, JournalEntry};

/// Result of one cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub telemetry: CycleTelemetry,
    /// True when the plan contained `halt`; the caller should stop looping
    pub halted: bool,
    /// Cooldown the conductor suggested for the gap before the next cycle
    pub suggested_cooldown_seconds: u64,
}

/// Run one cycle end to end and persist its telemetry record.
#[instrument(skip_all, fields(cycle = cycle_number))]
pub async fn run_cycle<E: GhExecutor + 'static, R: AgentRunner + 'static>(
    engine: &Engine<E, R>,
    cycle_number: u64,
    productive_cycles: u64,
) -> Result<CycleOutcome> {
    let config = &engine.config;
    let today = Utc::now().date_naive();
    let mut telemetry = CycleTelemetry::new(cycle_number, config.dry_run);

    info!("=== Cycle {} ===", cycle_number);
    ensure_labels(&engine.executor()).await?;

    let issues = engine.issues();
    let context = gather_context(
        &issues,
        &engine.prs(),
        &engine.ci(),
        config,
        cycle_number,
        productive_cycles,
        today,
    )
    .await?;

    let (plan, fallback) = plan_cycle(&*engine.runner(), config, &context, today).await;
    telemetry.conductor_reasoning = plan.reasoning.clone();
    telemetry.conductor_actions = plan.action_names();
    telemetry.conductor_fallback = fallback;

    let yield_kind = dispatch(engine, &plan, &mut telemetry, today).await;
    telemetry.finish(yield_kind);

    append_telemetry(&config.telemetry_path(), &telemetry)?;

    // Mechanical stability check over the recent window; never blocks a cycle
    let recent = load_telemetry(&config.telemetry_path(), 5);
    if let Err(err) = check_error_patterns(&issues, &recent).await {
        warn!("Circuit breaker check failed (non-fatal): {}", err);
    }

    let journal_entry = JournalEntry {
        cycle_number,
        timestamp: Utc::now(),
        reasoning: plan.reasoning.clone(),
        actions: plan.action_names(),
        notes_for_next_cycle: plan.notes_for_next_cycle.clone(),
        fallback,
    };
    if let Err(err) = append_journal(&config.conductor_journal_path(), &journal_entry) {
        warn!("Could not append conductor journal (non-fatal): {}", err);
    }

    let halted = plan.actions.iter().any(|a| matches!(a, Action::Halt));
    Ok(CycleOutcome {
        telemetry,
        halted,
        suggested_cooldown_seconds: plan.suggested_cooldown_seconds,
    })
}
