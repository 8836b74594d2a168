//! Review text normalization and run-scoped deduplication.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static NON_ALPHA: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z\s]").unwrap());

/// Reduces raw review content to lowercase letters and whitespace.
///
/// `None` means the review carries no usable text and must be skipped
/// entirely: no classification, no storage, no count contribution.
/// That covers missing content, content that lowers/strips to nothing
/// (pure emoji, digits, punctuation), and whitespace-only remainders.
pub fn normalize(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let lowered = raw.to_lowercase();
    let cleaned = NON_ALPHA.replace_all(&lowered, "").into_owned();
    if cleaned.trim().is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Exact-match dedup set for a single run. No fuzzy matching, no
/// cross-run memory.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true on first occurrence and records the text; false if
    /// this exact normalized text was already accepted in this run.
    pub fn accept(&mut self, normalized: &str) -> bool {
        self.seen.insert(normalized.to_string())
    }

    pub fn accepted_count(&self) -> usize {
        self.seen.len()
    }
}
