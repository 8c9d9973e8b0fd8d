//! News intake: discover decisions and file analysis issues.
//!
//! The scout runs at most once per calendar day and only when the analysis
//! queue is drained. Each discovered item becomes one `task:analysis` issue
//! whose body embeds the full decision JSON; the stable decision id makes
//! duplicate intake a silent no-op.

use std::fs;
use std::path::Path;
use std::time::Duration;

use cabinet_agent::{extract_json_array, AgentRequest, AgentRunner};
use cabinet_core::{
    Category, Decision, EngineConfig, Result, LABEL_BACKLOG, LABEL_TASK_ANALYSIS,
};
use cabinet_session::{decision_id, load_role_prompt};
use cabinet_tracker::{GhExecutor, IssueManager};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

const NEWS_SCOUT_MAX_TURNS: u32 = 20;
const NEWS_SCOUT_TOOLS: [&str; 2] = ["WebSearch", "WebFetch"];

/// Tracks when news was last fetched to enforce once-per-day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsScoutState {
    /// YYYY-MM-DD of the last run
    #[serde(default)]
    pub last_date: String,
}

impl NewsScoutState {
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

    pub fn ran_on(&self, today: NaiveDate) -> bool {
        self.last_date == today.format("%Y-%m-%d").to_string()
    }
}

/// Whether the news scout should run: not yet today, and no analysis issues
/// still pending.
pub fn should_fetch_news(state_path: &Path, today: NaiveDate, pending_analyses: usize) -> bool {
    if pending_analyses > 0 {
        debug!(
            "News scout gated: {} analysis issue(s) still open",
            pending_analyses
        );
        return false;
    }
    !NewsScoutState::load(state_path).ran_on(today)
}

fn parse_news_item(item: &Value, today: NaiveDate) -> Option<Decision> {
    let title = item.get("title")?.as_str()?.trim().to_string();
    if title.is_empty() {
        return None;
    }
    let date = item
        .get("date")
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .unwrap_or(today);
    // An unknown category is a schema violation: drop the item
    let category = match item.get("category").and_then(Value::as_str) {
        Some(raw) => match raw.parse::<Category>() {
            Ok(category) => category,
            Err(_) => {
                warn!("Skipping news item with unknown category: {}", raw);
                return None;
            }
        },
        None => Category::General,
    };
    Some(Decision {
        id: decision_id(&title, date),
        title,
        summary: item
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        full_text: item
            .get("full_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        date,
        source_url: item
            .get("source_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        category,
        tags: item
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        title_translated: None,
        summary_translated: None,
    })
}

/// Run the news scout agent and return parsed decisions, capped per run.
async fn run_news_scout<R: AgentRunner>(
    runner: &R,
    config: &EngineConfig,
    today: NaiveDate,
) -> Result<Vec<Decision>> {
    let system_prompt = load_role_prompt(&config.prompts_dir(), "news-scout");
    let request = AgentRequest::new(
        &system_prompt,
        &format!(
            "Search for significant government decisions published on {}. \
             Return a JSON array of at most {} items, each with: title, summary, \
             full_text, date (YYYY-MM-DD), source_url, category \
             (fiscal|legal|eu|health|security|education|economy|tourism|environment|general), \
             tags (array of strings). Return [] if nothing significant was published.",
            today.format("%Y-%m-%d"),
            config.news_cap_per_day,
        ),
        &config.model,
    )
    .with_tools(&NEWS_SCOUT_TOOLS)
    .with_max_turns(NEWS_SCOUT_MAX_TURNS)
    .with_timeout(Duration::from_secs(config.agent_timeout_seconds));

    let outcome = runner.run(&request).await?;
    let items = extract_json_array(&outcome.text).unwrap_or_default();
    let decisions: Vec<Decision> = items
        .iter()
        .filter_map(|item| parse_news_item(item, today))
        .take(config.news_cap_per_day)
        .collect();
    info!("News scout found {} decision(s)", decisions.len());
    Ok(decisions)
}

/// Whether an analysis issue already exists for this decision id.
async fn decision_tracked<E: GhExecutor>(
    issues: &IssueManager<E>,
    decision_id: &str,
) -> Result<bool> {
    let matches = issues.search(decision_id, 5).await?;
    Ok(!matches.is_empty())
}

/// Create the analysis issue for a decision, embedding the decision JSON so
/// execution can parse it without re-fetching the source.
pub async fn create_analysis_issue<E: GhExecutor>(
    issues: &IssueManager<E>,
    decision: &Decision,
) -> Result<u64> {
    let title: String = format!("Analyze: {}", decision.title)
        .chars()
        .take(120)
        .collect();
    let decision_json = serde_json::to_string_pretty(decision)?;
    let body = format!(
        "**Decision ID**: {}\n**Date**: {}\n**Category**: {}\n\n> {}\n\n\
         Run the full cabinet analysis on this decision.\n\n\
         <details><summary>Decision JSON</summary>\n\n```json\n{}\n```\n</details>",
        decision.id, decision.date, decision.category, decision.summary, decision_json,
    );
    issues
        .create(&title, &body, &[LABEL_BACKLOG, LABEL_TASK_ANALYSIS])
        .await
}

/// Parse the decision JSON embedded in an analysis issue body.
pub fn decision_from_issue_body(body: &str) -> Option<Decision> {
    let start = body.find("```json")? + "```json".len();
    let end = body[start..].find("```")? + start;
    serde_json::from_str(body[start..end].trim()).ok()
}

/// Full intake step: run the scout (when due), dedupe, create issues.
/// Returns the number of new issues created.
#[instrument(skip_all)]
pub async fn step_fetch_news<E: GhExecutor, R: AgentRunner>(
    issues: &IssueManager<E>,
    runner: &R,
    config: &EngineConfig,
    today: NaiveDate,
) -> Result<usize> {
    let pending = issues
        .list_open_by_label(LABEL_TASK_ANALYSIS, 50)
        .await?
        .len();
    if !should_fetch_news(&config.news_scout_state_path(), today, pending) {
        info!("News scout not due");
        return Ok(0);
    }

    let decisions = run_news_scout(runner, config, today).await?;
    NewsScoutState {
        last_date: today.format("%Y-%m-%d").to_string(),
    }
    .save(&config.news_scout_state_path())?;

    let mut created = 0;
    for decision in &decisions {
        // Duplicate intake is a silent skip, not an error
        if decision_tracked(issues, &decision.id).await? {
            debug!("Decision {} already tracked", decision.id);
            continue;
        }
        let number = create_analysis_issue(issues, decision).await?;
        info!("Created analysis issue #{} for {}", number, decision.id);
        created += 1;
    }
    Ok(created)
}
