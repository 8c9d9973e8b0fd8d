//! Stable decision-id derivation.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Derive the stable decision id: `news-{YYYY-MM-DD}-{sha256(title)[..8]}`.
///
/// The same (date, title) pair always produces the same id, which makes
/// intake deduplication a plain string comparison against tracker issues.
pub fn decision_id(title: &str, date: NaiveDate) -> String {
    let digest = Sha256::digest(title.as_bytes());
    let hex: String = digest
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("news-{}-{}", date.format("%Y-%m-%d"), hex)
}
