//! Append-only JSONL journals: telemetry, structured errors, and the
//! conductor journal.
//!
//! Each record is one line, built fully in memory and written with a single
//! call so a crash can corrupt at most the trailing line. Readers skip
//! anything that does not parse.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use cabinet_core::{CycleTelemetry, ErrorEntry, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Keep the conductor journal from growing without bound; only the last few
/// entries are ever read as context.
const JOURNAL_KEEP_LINES: usize = 50;

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())?;
    Ok(())
}

fn load_lines<T: DeserializeOwned>(path: &Path, last_n: usize) -> Vec<T> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut entries: Vec<T> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(_) => {
                warn!("Skipping invalid journal line in {}", path.display());
                None
            }
        })
        .collect();
    if last_n > 0 && entries.len() > last_n {
        entries.drain(..entries.len() - last_n);
    }
    entries
}

/// Append one telemetry record as a single JSON line.
pub fn append_telemetry(path: &Path, entry: &CycleTelemetry) -> Result<()> {
    append_line(path, &serde_json::to_string(entry)?)
}

/// Load telemetry records, skipping invalid lines. `last_n = 0` loads all.
pub fn load_telemetry(path: &Path, last_n: usize) -> Vec<CycleTelemetry> {
    load_lines(path, last_n)
}

/// Append one structured error entry.
pub fn append_error_entry(path: &Path, entry: &ErrorEntry) -> Result<()> {
    append_line(path, &serde_json::to_string(entry)?)
}

/// Load structured errors, skipping invalid lines.
pub fn load_errors(path: &Path, last_n: usize) -> Vec<ErrorEntry> {
    load_lines(path, last_n)
}

/// One conductor journal entry: what was planned and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub reasoning: String,
    pub actions: Vec<String>,
    pub notes_for_next_cycle: String,
    pub fallback: bool,
}

/// Append a journal entry, trimming the file when it grows past the keep
/// window (older entries are never read).
pub fn append_journal(path: &Path, entry: &JournalEntry) -> Result<()> {
    append_line(path, &serde_json::to_string(entry)?)?;
    let entries: Vec<JournalEntry> = load_lines(path, 0);
    if entries.len() > JOURNAL_KEEP_LINES {
        let keep = &entries[entries.len() - JOURNAL_KEEP_LINES..];
        let mut buf = String::new();
        for entry in keep {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        fs::write(path, buf)?;
    }
    Ok(())
}

/// Load the last `last_n` journal entries.
pub fn load_journal(path: &Path, last_n: usize) -> Vec<JournalEntry> {
    load_lines(path, last_n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabinet_core::YieldKind;

    #[test]
    fn test_telemetry_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");

        for cycle in 1..=3 {
            let mut t = CycleTelemetry::new(cycle, false);
            t.finish(YieldKind::None);
            append_telemetry(&path, &t).unwrap();
        }

        let all = load_telemetry(&path, 0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].cycle_number, 1);

        let tail = load_telemetry(&path, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].cycle_number, 2);
    }

    #[test]
    fn test_reader_skips_partial_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");

        let mut t = CycleTelemetry::new(1, false);
        t.finish(YieldKind::None);
        append_telemetry(&path, &t).unwrap();
        // Simulate a crash mid-write
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"cycle_number\": 2, \"started").unwrap();

        let loaded = load_telemetry(&path, 0);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].cycle_number, 1);
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_telemetry(&dir.path().join("absent.jsonl"), 0).is_empty());
    }

    #[test]
    fn test_journal_trims_to_keep_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor_journal.jsonl");

        for cycle in 1..=60 {
            append_journal(
                &path,
                &JournalEntry {
                    cycle_number: cycle,
                    timestamp: Utc::now(),
                    reasoning: "r".to_string(),
                    actions: vec!["skip_cycle".to_string()],
                    notes_for_next_cycle: String::new(),
                    fallback: false,
                },
            )
            .unwrap();
        }

        let all = load_journal(&path, 0);
        assert_eq!(all.len(), JOURNAL_KEEP_LINES);
        assert_eq!(all.last().unwrap().cycle_number, 60);

        let tail = load_journal(&path, 10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0].cycle_number, 51);
    }
}
