//! Deterministic backlog selector.
//!
//! A pure function over the open backlog; the tracker stays the single
//! source of truth and the priority order is re-derived every cycle.

use cabinet_core::{
    Issue, LABEL_DIRECTOR, LABEL_GAP_CONTENT, LABEL_GAP_TECHNICAL, LABEL_HUMAN,
    LABEL_PRIORITY_CRITICAL, LABEL_STRATEGY, LABEL_TASK_ANALYSIS,
};

/// Pick the next backlog issue using the 5-tier priority:
///
/// 1. `priority:critical`, most recently created first
/// 2. `task:analysis`, FIFO
/// 3. `human-suggestion`, FIFO
/// 4. `director-suggestion` / `strategy-suggestion`, FIFO
/// 5. everything else, FIFO
///
/// Gap observation issues are director input, not executable tasks, and are
/// never picked.
pub fn pick(issues: &[Issue]) -> Option<&Issue> {
    let candidates: Vec<&Issue> = issues
        .iter()
        .filter(|i| !i.has_label(LABEL_GAP_CONTENT) && !i.has_label(LABEL_GAP_TECHNICAL))
        .collect();

    // Tier 1: critical, newest first
    if let Some(issue) = candidates
        .iter()
        .filter(|i| i.has_label(LABEL_PRIORITY_CRITICAL))
        .max_by_key(|i| i.created_at)
    {
        return Some(issue);
    }

    // Tiers 2-4: FIFO within each label group
    for tier in [
        vec![LABEL_TASK_ANALYSIS],
        vec![LABEL_HUMAN],
        vec![LABEL_DIRECTOR, LABEL_STRATEGY],
    ] {
        if let Some(issue) = candidates
            .iter()
            .filter(|i| tier.iter().any(|label| i.has_label(label)))
            .min_by_key(|i| i.created_at)
        {
            return Some(issue);
        }
    }

    // Tier 5: oldest first
    candidates.into_iter().min_by_key(|i| i.created_at)
}
