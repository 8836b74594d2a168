//! Registry of completed runs.
//!
//! The hosting layer wants "expose the most recent completed run to
//! readers". Instead of a bare global holding the last table name, this
//! is a single-writer, multi-reader map keyed by run id; the latest
//! pointer only ever moves under the write lock, so concurrent readers
//! never observe a torn update.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::pipeline::RunResult;

#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub run_id: String,
    pub result: RunResult,
    pub completed_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    runs: HashMap<String, CompletedRun>,
    latest: Option<String>,
}

#[derive(Default)]
pub struct RunRegistry {
    inner: RwLock<RegistryInner>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed run under a fresh run id and marks it latest.
    pub fn record(&self, result: RunResult) -> String {
        let run_id = Uuid::new_v4().to_string();
        let completed = CompletedRun {
            run_id: run_id.clone(),
            result,
            completed_at: Utc::now(),
        };
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.runs.insert(run_id.clone(), completed);
        inner.latest = Some(run_id.clone());
        run_id
    }

    pub fn get(&self, run_id: &str) -> Option<CompletedRun> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .runs
            .get(run_id)
            .cloned()
    }

    pub fn latest(&self) -> Option<CompletedRun> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .latest
            .as_ref()
            .and_then(|id| inner.runs.get(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(table: &str, pct: f64) -> RunResult {
        RunResult {
            positive_percentage: pct,
            review_table_id: table.to_string(),
        }
    }

    #[test]
    fn test_latest_follows_last_record() {
        let registry = RunRegistry::new();
        registry.record(result("reviews_a", 40.0));
        let second = registry.record(result("reviews_b", 75.0));

        let latest = registry.latest().unwrap();
        assert_eq!(latest.run_id, second);
        assert_eq!(latest.result.review_table_id, "reviews_b");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_runs_stay_addressable_by_id() {
        let registry = RunRegistry::new();
        let first = registry.record(result("reviews_a", 40.0));
        registry.record(result("reviews_b", 75.0));

        let kept = registry.get(&first).unwrap();
        assert_eq!(kept.result.review_table_id, "reviews_a");
    }

    #[test]
    fn test_empty_registry() {
        let registry = RunRegistry::new();
        assert!(registry.latest().is_none());
        assert!(registry.is_empty());
    }
}
