//! Oversight agents: proposer, project director, strategic director,
//! research scout, editorial review.
//!
//! Directors get their context pre-fetched (they run without tools); their
//! issue output is hard-capped in code regardless of what the agent returns.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use cabinet_agent::{extract_json_array, extract_json_object, AgentRequest, AgentRunner};
use cabinet_core::{
    EngineConfig, ErrorEntry, Result, SessionResult, LABEL_BACKLOG, LABEL_DIRECTOR,
    LABEL_EDITORIAL, LABEL_FAILED, LABEL_PROPOSED, LABEL_RESEARCH_SCOUT, LABEL_STRATEGY,
    LABEL_TASK_CODE,
};
use cabinet_session::load_role_prompt;
use cabinet_tracker::{GhExecutor, IssueManager};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::journal::{load_errors, load_telemetry};

const PROPOSE_MAX_TURNS: u32 = 10;
const PROPOSE_TOOLS: [&str; 4] = ["Bash", "Read", "Glob", "Grep"];
const DIRECTOR_MAX_TURNS: u32 = 10;
const RESEARCH_SCOUT_MAX_TURNS: u32 = 15;
const RESEARCH_SCOUT_TOOLS: [&str; 2] = ["WebSearch", "WebFetch"];
const EDITORIAL_MAX_TURNS: u32 = 8;

/// A validated (title, description) pair from an oversight agent.
fn parse_titled_items(items: &[Value], cap: usize) -> Vec<(String, String)> {
    items
        .iter()
        .filter_map(|item| {
            let title = item.get("title")?.as_str()?.trim();
            let description = item.get("description")?.as_str()?.trim();
            if title.is_empty() || title.len() > 120 || description.is_empty() {
                warn!("Skipping invalid oversight item: {:?}", item);
                return None;
            }
            Some((title.to_string(), description.to_string()))
        })
        .take(cap)
        .collect()
}

// ---------------------------------------------------------------------------
// Proposer
// ---------------------------------------------------------------------------

/// PM agent proposes improvements as `self-improve:proposed` issues.
/// Existing titles (open, closed, failed) are fed in as dedup context.
#[instrument(skip_all)]
pub async fn step_propose<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
    num_proposals: usize,
) -> Result<Vec<u64>> {
    let all = issues.list_all(200).await?;
    let mut open_titles = Vec::new();
    let mut closed_titles = Vec::new();
    let mut failed_titles = Vec::new();
    for issue in &all {
        if issue.has_label(LABEL_FAILED) {
            failed_titles.push(issue.title.as_str());
        } else if issue.open {
            open_titles.push(issue.title.as_str());
        } else {
            closed_titles.push(issue.title.as_str());
        }
    }

    let mut context = String::new();
    for (heading, titles) in [
        ("Existing open issues (do NOT duplicate)", &open_titles),
        ("Completed or rejected work (do NOT re-propose)", &closed_titles),
        ("Previously failed proposals (do NOT re-propose)", &failed_titles),
    ] {
        if !titles.is_empty() {
            context.push_str(&format!("\n\n**{}**:\n", heading));
            for title in titles {
                context.push_str(&format!("- {}\n", title));
            }
        }
    }

    let system_prompt = load_role_prompt(&config.prompts_dir(), "pm");
    let request = AgentRequest::new(
        &system_prompt,
        &format!(
            "Propose exactly {} well-scoped improvements to this project. \
             Browse the source tree first to ground each proposal in the code.\
             {}\n\n\
             Every proposal must be implementable in one session; name the \
             files to change and concrete acceptance criteria.\n\n\
             Return ONLY a JSON array of {} objects: \
             [{{\"title\": \"<under 120 chars>\", \"description\": \"...\"}}]",
            num_proposals, context, num_proposals,
        ),
        &config.model,
    )
    .with_tools(&PROPOSE_TOOLS)
    .with_max_turns(PROPOSE_MAX_TURNS)
    .with_timeout(Duration::from_secs(config.agent_timeout_seconds));

    let outcome = runner.run(&request).await?;
    let items = extract_json_array(&outcome.text).unwrap_or_default();
    let proposals = parse_titled_items(&items, num_proposals);

    let mut created = Vec::new();
    for (title, description) in proposals {
        let number = issues
            .create(&title, &description, &[LABEL_PROPOSED])
            .await?;
        info!("PM proposed #{}: {}", number, title);
        created.push(number);
    }
    Ok(created)
}

// ---------------------------------------------------------------------------
// Directors
// ---------------------------------------------------------------------------

fn telemetry_sections(config: &EngineConfig, last_n: usize) -> String {
    let mut sections = Vec::new();

    let telemetry = load_telemetry(&config.telemetry_path(), last_n);
    if telemetry.is_empty() {
        sections.push("## Telemetry\n\nNo telemetry data available yet.".to_string());
    } else {
        let lines: Vec<String> = telemetry
            .iter()
            .filter_map(|t| serde_json::to_string(t).ok())
            .collect();
        sections.push(format!(
            "## Recent Telemetry (last {} cycles)\n\n{}",
            telemetry.len(),
            lines.join("\n")
        ));

        let productive = telemetry.iter().filter(|t| t.productive).count();
        sections.push(format!(
            "## Cycle Yield: {}/{} productive",
            productive,
            telemetry.len()
        ));

        let mut phase_failures: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &telemetry {
            for phase in &entry.phases {
                if !phase.success {
                    *phase_failures.entry(phase.action.clone()).or_default() += 1;
                }
            }
        }
        if !phase_failures.is_empty() {
            let lines: Vec<String> = phase_failures
                .iter()
                .map(|(action, count)| format!("  {}: {} failures", action, count))
                .collect();
            sections.push(format!("## Phase Failures\n\n{}", lines.join("\n")));
        }
    }

    let errors: Vec<ErrorEntry> = load_errors(&config.errors_path(), last_n * 3);
    if !errors.is_empty() {
        let lines: Vec<String> = errors
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect();
        sections.push(format!(
            "## Recent Runtime Errors ({} entries)\n\n{}",
            errors.len(),
            lines.join("\n")
        ));
    }

    sections.join("\n\n")
}

async fn tracker_sections<E: GhExecutor>(issues: &IssueManager<E>) -> String {
    let mut sections = Vec::new();
    if let Ok(recent) = issues.list_all(30).await {
        let lines: Vec<String> = recent
            .iter()
            .map(|i| {
                format!(
                    "- #{} [{}] {} ({:?})",
                    i.number,
                    if i.open { "open" } else { "closed" },
                    i.title,
                    i.labels,
                )
            })
            .collect();
        sections.push(format!("## Recent Issues\n\n{}", lines.join("\n")));

        let mut label_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for issue in recent.iter().filter(|i| i.open) {
            for label in &issue.labels {
                *label_counts.entry(label.as_str()).or_default() += 1;
            }
        }
        if !label_counts.is_empty() {
            let lines: Vec<String> = label_counts
                .iter()
                .map(|(label, count)| format!("  {}: {}", label, count))
                .collect();
            sections.push(format!("## Open Issue Label Distribution\n\n{}", lines.join("\n")));
        }
    }
    sections.join("\n\n")
}

async fn run_director_agent<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
    role: &str,
    focus: &str,
    labels: &[&str],
) -> Result<Vec<u64>> {
    let mut context = telemetry_sections(config, 20);
    context.push_str("\n\n");
    context.push_str(&tracker_sections(issues).await);

    let system_prompt = load_role_prompt(&config.prompts_dir(), role);
    let request = AgentRequest::new(
        &system_prompt,
        &format!(
            "Review the operational data below and identify {}.\n\n{}\n\n\
             Output a JSON array of 0-{} issues to file, each targeting a root \
             cause. If the system is healthy, output [].\n\n\
             Format: [{{\"title\": \"...\", \"description\": \"...\"}}]",
            focus, context, config.director_issue_cap,
        ),
        &config.model,
    )
    .with_max_turns(DIRECTOR_MAX_TURNS)
    .with_timeout(Duration::from_secs(config.agent_timeout_seconds));

    let outcome = runner.run(&request).await?;
    let items = extract_json_array(&outcome.text).unwrap_or_default();
    // Hard cap enforced in code regardless of agent output
    let filed = parse_titled_items(&items, config.director_issue_cap);

    let mut created = Vec::new();
    for (title, description) in filed {
        let number = issues.create(&title, &description, labels).await?;
        info!("{} filed #{}: {}", role, number, title);
        created.push(number);
    }
    Ok(created)
}

/// Project director: reviews telemetry for systemic operational problems.
#[instrument(skip_all)]
pub async fn step_director<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
) -> Result<Vec<u64>> {
    run_director_agent(
        issues,
        runner,
        config,
        "director",
        "systemic operational problems",
        &[LABEL_DIRECTOR, LABEL_BACKLOG, LABEL_TASK_CODE],
    )
    .await
}

/// Strategic director: reviews output yield and coverage for strategic gaps.
#[instrument(skip_all)]
pub async fn step_strategic_director<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
) -> Result<Vec<u64>> {
    run_director_agent(
        issues,
        runner,
        config,
        "strategic-director",
        "strategic opportunities and capability gaps",
        &[LABEL_STRATEGY, LABEL_BACKLOG, LABEL_TASK_CODE],
    )
    .await
}

// ---------------------------------------------------------------------------
// Research scout
// ---------------------------------------------------------------------------

/// Tracks when the research scout last ran to enforce its interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchScoutState {
    /// ISO 8601 timestamp of the last run
    #[serde(default)]
    pub last_ts: String,
}

impl ResearchScoutState {
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Whether the configured interval has elapsed since the last run.
    pub fn is_due(&self, now: DateTime<Utc>, interval_days: i64) -> bool {
        match self.last_ts.parse::<DateTime<Utc>>() {
            Ok(last) => (now - last).num_days() >= interval_days,
            Err(_) => true,
        }
    }
}

/// Research scout: scans the ecosystem for developments worth adopting.
/// Output titles are deduplicated against open research-scout issues.
#[instrument(skip_all)]
pub async fn step_research_scout<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Vec<u64>> {
    let existing = issues.list_open_by_label(LABEL_RESEARCH_SCOUT, 20).await?;
    let existing_section = if existing.is_empty() {
        "No open research-scout issues.".to_string()
    } else {
        existing
            .iter()
            .map(|i| format!("- #{}: {}", i.number, i.title))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let system_prompt = load_role_prompt(&config.prompts_dir(), "research-scout");
    let request = AgentRequest::new(
        &system_prompt,
        &format!(
            "Scan for recent developments in agent tooling, models, and \
             orchestration patterns that could improve this project.\n\n\
             Already-filed research issues (do NOT duplicate):\n{}\n\n\
             Return a JSON array of 0-2 actionable issues, or [] if nothing new: \
             [{{\"title\": \"...\", \"description\": \"...\"}}]",
            existing_section,
        ),
        &config.model,
    )
    .with_tools(&RESEARCH_SCOUT_TOOLS)
    .with_max_turns(RESEARCH_SCOUT_MAX_TURNS)
    .with_timeout(Duration::from_secs(config.agent_timeout_seconds));

    let outcome = runner.run(&request).await?;
    let items = extract_json_array(&outcome.text).unwrap_or_default();
    // Unlike the directors, the scout is not issue-capped; the interval is
    // its only rate limit
    let filed = parse_titled_items(&items, items.len());

    let mut created = Vec::new();
    for (title, description) in filed {
        if existing.iter().any(|i| i.title == title) {
            warn!("Research scout duplicated an open title, skipping: {}", title);
            continue;
        }
        let number = issues
            .create(
                &title,
                &description,
                &[LABEL_RESEARCH_SCOUT, LABEL_BACKLOG, LABEL_TASK_CODE],
            )
            .await?;
        info!("Research scout filed #{}: {}", number, title);
        created.push(number);
    }

    ResearchScoutState {
        last_ts: now.to_rfc3339(),
    }
    .save(&config.research_scout_state_path())?;

    Ok(created)
}

// ---------------------------------------------------------------------------
// Editorial review
// ---------------------------------------------------------------------------

/// Editorial review of a completed analysis.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditorialReview {
    pub approved: bool,
    pub quality_score: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Run one editorial review over a published analysis. Non-blocking: any
/// failure returns `None` and the analysis stays published. An unapproved
/// review files an `editorial-quality` backlog issue.
#[instrument(skip_all, fields(decision = %result.decision.id))]
pub async fn step_editorial_review<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
    result: &SessionResult,
    result_path: &Path,
) -> Option<EditorialReview> {
    let system_prompt = load_role_prompt(&config.prompts_dir(), "editorial-director");
    let request = AgentRequest::new(
        &system_prompt,
        &format!(
            "Review the published analysis for quality and public impact. \
             The full result is in: {}\n\
             Read that file, then return a single JSON object: \
             {{\"approved\": <bool>, \"quality_score\": <1-10>, \
             \"strengths\": [..], \"issues\": [..], \"recommendations\": [..]}}\n\
             Most analyses should pass; only block for clear factual errors.",
            result_path.display(),
        ),
        &config.model,
    )
    .with_tools(&["Read"])
    .with_max_turns(EDITORIAL_MAX_TURNS)
    .with_timeout(Duration::from_secs(config.agent_timeout_seconds));

    let outcome = match runner.run(&request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("Editorial review failed (non-blocking): {}", err);
            return None;
        }
    };
    let review: EditorialReview = match extract_json_object(&outcome.text)
        .and_then(|value| serde_json::from_value(value).ok())
    {
        Some(review) => review,
        None => {
            warn!("Editorial review output unparseable (non-blocking)");
            return None;
        }
    };

    if !review.approved {
        let issues_section: String = review
            .issues
            .iter()
            .map(|i| format!("- {}\n", i))
            .collect();
        let recs_section: String = review
            .recommendations
            .iter()
            .map(|r| format!("- {}\n", r))
            .collect();
        let body = format!(
            "**Editorial review flagged quality issues in analysis {}**\n\n\
             **Quality score**: {}/10\n\n**Issues**:\n{}\n**Recommendations**:\n{}",
            result.decision.id, review.quality_score, issues_section, recs_section,
        );
        let title = format!("Editorial quality issues in analysis: {}", result.decision.id);
        match issues
            .create(&title, &body, &[LABEL_EDITORIAL, LABEL_BACKLOG])
            .await
        {
            Ok(number) => info!("Filed editorial quality issue #{}", number),
            Err(err) => warn!("Could not file editorial issue (non-blocking): {}", err),
        }
    }

    Some(review)
}

/// Whether the research scout is due today.
pub fn research_scout_due(config: &EngineConfig, now: DateTime<Utc>) -> bool {
    ResearchScoutState::load(&config.research_scout_state_path())
        .is_due(now, config.research_interval_days)
}

/// Whether the news scout already ran today (for the conductor context).
pub fn news_ran_today(config: &EngineConfig, today: NaiveDate) -> bool {
    crate::intake::NewsScoutState::load(&config.news_scout_state_path()).ran_on(today)
}
