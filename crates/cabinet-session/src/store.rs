//! Session result persistence: one JSON document per decision plus a flat
//! summary index for downstream renderers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cabinet_core::{Category, Result, SessionResult, Verdict};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One row of `analyses-index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub category: Category,
    /// Per-ministry scores, keyed by ministry slug
    pub scores: BTreeMap<String, u8>,
    /// Parliament's overall verdict, when the debate succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

impl IndexEntry {
    fn from_result(result: &SessionResult) -> Self {
        Self {
            id: result.decision.id.clone(),
            title: result.decision.title.clone(),
            date: result.decision.date,
            category: result.decision.category,
            scores: result
                .assessments
                .iter()
                .map(|a| (a.ministry.slug().to_string(), a.score))
                .collect(),
            verdict: result.debate.as_ref().map(|d| d.overall_verdict),
        }
    }
}

/// Write one SessionResult to `{analyses_dir}/{decision_id}.json`.
pub fn save_result(analyses_dir: &Path, result: &SessionResult) -> Result<PathBuf> {
    fs::create_dir_all(analyses_dir)?;
    let path = analyses_dir.join(format!("{}.json", result.decision.id));
    let json = serde_json::to_string_pretty(result)?;
    fs::write(&path, json)?;
    info!("Saved analysis to {}", path.display());
    Ok(path)
}

/// Load all stored results, skipping files that fail to parse.
pub fn load_results(analyses_dir: &Path) -> Result<Vec<SessionResult>> {
    let mut results = Vec::new();
    if !analyses_dir.exists() {
        return Ok(results);
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(analyses_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    for path in paths {
        match fs::read_to_string(&path)
            .map_err(cabinet_core::CabinetError::from)
            .and_then(|text| Ok(serde_json::from_str::<SessionResult>(&text)?))
        {
            Ok(result) => results.push(result),
            Err(err) => warn!("Skipping unreadable analysis {}: {}", path.display(), err),
        }
    }
    Ok(results)
}

/// Rebuild `analyses-index.json` from everything stored in the analyses dir.
pub fn rebuild_index(analyses_dir: &Path, index_path: &Path) -> Result<Vec<IndexEntry>> {
    let results = load_results(analyses_dir)?;
    let mut entries: Vec<IndexEntry> = results.iter().map(IndexEntry::from_result).collect();
    entries.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
    if let Some(parent) = index_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(index_path, serde_json::to_string_pretty(&entries)?)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_core::{Assessment, Decision, Ministry, ParliamentDebate};

    fn sample_result(id: &str, day: u32) -> SessionResult {
        let decision = Decision {
            id: id.to_string(),
            title: format!("Decision {}", id),
            summary: "s".to_string(),
            full_text: String::new(),
            date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            source_url: String::new(),
            category: Category::Fiscal,
            tags: Vec::new(),
            title_translated: None,
            summary_translated: None,
        };
        let mut result = SessionResult::new(decision);
        result
            .assessments
            .push(Assessment::neutral_fallback(Ministry::Finance, id));
        result.debate = Some(ParliamentDebate {
            decision_id: id.to_string(),
            consensus_summary: "c".to_string(),
            disagreements: Vec::new(),
            overall_verdict: Verdict::Positive,
            debate_transcript: "t".to_string(),
        });
        result
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let result = sample_result("news-2026-03-15-aaaaaaaa", 15);
        let path = save_result(dir.path(), &result).unwrap();
        assert!(path.ends_with("news-2026-03-15-aaaaaaaa.json"));

        let loaded = load_results(dir.path()).unwrap();
        assert_eq!(loaded, vec![result]);
    }

    #[test]
    fn test_load_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        save_result(dir.path(), &sample_result("news-2026-03-15-aaaaaaaa", 15)).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let loaded = load_results(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_rebuild_index_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        save_result(dir.path(), &sample_result("news-2026-03-14-bbbbbbbb", 14)).unwrap();
        save_result(dir.path(), &sample_result("news-2026-03-16-cccccccc", 16)).unwrap();
        let index_path = dir.path().join("analyses-index.json");

        let entries = rebuild_index(dir.path(), &index_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "news-2026-03-16-cccccccc");
        assert_eq!(entries[0].scores.get("finance"), Some(&5));
        assert_eq!(entries[0].verdict, Some(Verdict::Positive));
        assert!(index_path.exists());
    }
}
