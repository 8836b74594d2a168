//! End-to-end pipeline scenarios against fake capabilities.
//!
//! The storefront driver, review source, classifier, and store are all
//! swapped for in-memory fakes so the orchestrator's sequencing, skip
//! rules, failure handling, and durability guarantees are exercised
//! without a browser, network, or database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use review_crawler::db::{ReviewRecord, ReviewStore};
use review_crawler::error::ScrapeError;
use review_crawler::ml::{ClassifiedReview, LexiconClassifier, Sentiment, SentimentClassifier};
use review_crawler::pipeline::{ReviewPipeline, ScrapeRequest};
use review_crawler::reviews::{RawReview, ReviewSource, SortOrder};
use review_crawler::storefront::{SourceHandle, StorefrontLocator};

// ============================================================================
// Fakes
// ============================================================================

struct FakeLocator {
    handle: Option<SourceHandle>,
    closed: Arc<AtomicBool>,
}

impl FakeLocator {
    fn resolving(app_id: &str) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                handle: Some(SourceHandle::new(app_id)),
                closed: closed.clone(),
            },
            closed,
        )
    }

    fn not_found() -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                handle: None,
                closed: closed.clone(),
            },
            closed,
        )
    }
}

#[async_trait]
impl StorefrontLocator for FakeLocator {
    async fn locate(&mut self, query: &str) -> Result<SourceHandle, ScrapeError> {
        match self.handle.clone() {
            Some(handle) => Ok(handle),
            None => Err(ScrapeError::NotFound(query.to_string())),
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FakeSource {
    reviews: Vec<RawReview>,
}

impl FakeSource {
    fn with_texts(texts: &[&str]) -> Self {
        Self {
            reviews: texts.iter().map(|t| RawReview::new(*t)).collect(),
        }
    }
}

#[async_trait]
impl ReviewSource for FakeSource {
    async fn fetch_page(
        &self,
        _handle: &SourceHandle,
        _sort: SortOrder,
        count: usize,
    ) -> Result<Vec<RawReview>, ScrapeError> {
        Ok(self.reviews.iter().take(count).cloned().collect())
    }
}

/// Delegates to the lexicon backend until its budget runs out, then
/// reports the model as unavailable.
struct FailingClassifier {
    remaining: Mutex<usize>,
    inner: LexiconClassifier,
}

impl FailingClassifier {
    fn after(calls: usize) -> Self {
        Self {
            remaining: Mutex::new(calls),
            inner: LexiconClassifier::new(),
        }
    }
}

#[async_trait]
impl SentimentClassifier for FailingClassifier {
    async fn classify(&self, text: &str) -> Result<(Sentiment, f64), ScrapeError> {
        {
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining == 0 {
                return Err(ScrapeError::ClassifierUnavailable(
                    "model process went away".to_string(),
                ));
            }
            *remaining -= 1;
        }
        self.inner.classify(text).await
    }
}

#[derive(Default)]
struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<ReviewRecord>>>,
    created: Mutex<Vec<String>>,
}

impl MemoryStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn table(&self, table_id: &str) -> Vec<ReviewRecord> {
        self.tables
            .lock()
            .unwrap()
            .get(table_id)
            .cloned()
            .unwrap_or_default()
    }

    fn table_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

/// Handle passed into the pipeline; the backing store stays visible to
/// the test for assertions.
struct SharedStore(Arc<MemoryStore>);

#[async_trait]
impl ReviewStore for SharedStore {
    async fn create_run(&self) -> Result<String, ScrapeError> {
        let table_id = format!("reviews_{}", uuid::Uuid::new_v4().simple());
        self.0
            .tables
            .lock()
            .unwrap()
            .insert(table_id.clone(), Vec::new());
        self.0.created.lock().unwrap().push(table_id.clone());
        Ok(table_id)
    }

    async fn append(
        &self,
        table_id: &str,
        review: &ClassifiedReview,
    ) -> Result<i64, ScrapeError> {
        let mut tables = self.0.tables.lock().unwrap();
        let rows = tables
            .get_mut(table_id)
            .ok_or_else(|| ScrapeError::StorageWriteFailure("no such table".to_string()))?;
        let id = rows.len() as i64 + 1;
        rows.push(ReviewRecord {
            id,
            review: review.text.clone(),
            sentiment_label: review.label.to_string(),
            sentiment_score: review.score,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn fetch_run(&self, table_id: &str) -> Result<Vec<ReviewRecord>, ScrapeError> {
        Ok(self.0.table(table_id))
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn three_distinct_reviews_two_positive() {
    let (locator, closed) = FakeLocator::resolving("com.example.notes");
    let source = FakeSource::with_texts(&[
        "Love this great app, smooth and fast!",
        "Really helpful and easy to use.",
        "Terrible, buggy, crashes on launch.",
    ]);
    let store = MemoryStore::new();

    let pipeline = ReviewPipeline::new(locator, source, LexiconClassifier::new(), SharedStore(store.clone()));
    let result = pipeline
        .run(ScrapeRequest::new("ExampleApp", 3))
        .await
        .unwrap();

    assert!((result.positive_percentage - 200.0 / 3.0).abs() < 0.01);
    assert!(!result.review_table_id.is_empty());

    let records = store.table(&result.review_table_id);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].sentiment_label, "POSITIVE");
    assert_eq!(records[2].sentiment_label, "NEGATIVE");
    // Sequence ids are assigned monotonically by the store.
    assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn duplicate_normalized_text_stored_once() {
    let (locator, _) = FakeLocator::resolving("com.example.notes");
    // Same text after normalization: case and punctuation differ only.
    let source = FakeSource::with_texts(&["Great app!!!", "great APP"]);
    let store = MemoryStore::new();

    let pipeline = ReviewPipeline::new(locator, source, LexiconClassifier::new(), SharedStore(store.clone()));
    let result = pipeline
        .run(ScrapeRequest::new("ExampleApp", 2))
        .await
        .unwrap();

    assert_eq!(store.table(&result.review_table_id).len(), 1);
    assert_eq!(result.positive_percentage, 100.0);
}

#[tokio::test]
async fn unmatched_query_fails_without_creating_a_table() {
    let (locator, closed) = FakeLocator::not_found();
    let source = FakeSource::with_texts(&["never fetched"]);
    let store = MemoryStore::new();

    let pipeline = ReviewPipeline::new(locator, source, LexiconClassifier::new(), SharedStore(store.clone()));
    let err = pipeline
        .run(ScrapeRequest::new("NoSuchApp", 3))
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::NotFound(_)));
    assert_eq!(store.table_count(), 0);
    // The session is released on the failure path too.
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn classifier_outage_keeps_committed_records() {
    let (locator, closed) = FakeLocator::resolving("com.example.notes");
    let source = FakeSource::with_texts(&[
        "great app",
        "awful and broken",
        "smooth and fast",
        "useless garbage",
        "love it",
    ]);
    let store = MemoryStore::new();

    let pipeline =
        ReviewPipeline::new(locator, source, FailingClassifier::after(2), SharedStore(store.clone()));
    let err = pipeline
        .run(ScrapeRequest::new("ExampleApp", 5))
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::ClassifierUnavailable(_)));
    assert_eq!(store.table_count(), 1);
    let table_id = store.created.lock().unwrap()[0].clone();
    // Exactly the two reviews classified before the outage are durable.
    assert_eq!(store.table(&table_id).len(), 2);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn empty_and_symbol_only_reviews_are_skipped() {
    let (locator, _) = FakeLocator::resolving("com.example.notes");
    let source = FakeSource {
        reviews: vec![
            RawReview { text: None },
            RawReview::new("!!! 123 🎉"),
            RawReview::new("   "),
            RawReview::new("solid and reliable"),
        ],
    };
    let store = MemoryStore::new();

    let pipeline = ReviewPipeline::new(locator, source, LexiconClassifier::new(), SharedStore(store.clone()));
    let result = pipeline
        .run(ScrapeRequest::new("ExampleApp", 4))
        .await
        .unwrap();

    assert_eq!(store.table(&result.review_table_id).len(), 1);
    assert_eq!(result.positive_percentage, 100.0);
}

#[tokio::test]
async fn zero_accepted_reviews_reports_zero_percent() {
    let (locator, _) = FakeLocator::resolving("com.example.notes");
    let source = FakeSource::with_texts(&[]);
    let store = MemoryStore::new();

    let pipeline = ReviewPipeline::new(locator, source, LexiconClassifier::new(), SharedStore(store.clone()));
    let result = pipeline
        .run(ScrapeRequest::new("ExampleApp", 10))
        .await
        .unwrap();

    assert_eq!(result.positive_percentage, 0.0);
    assert!(store.table(&result.review_table_id).is_empty());
}

#[tokio::test]
async fn short_page_is_partial_success() {
    let (locator, _) = FakeLocator::resolving("com.example.notes");
    let source = FakeSource::with_texts(&["great app", "broken mess"]);
    let store = MemoryStore::new();

    // Ten requested, two available: the run completes with the subset.
    let pipeline = ReviewPipeline::new(locator, source, LexiconClassifier::new(), SharedStore(store.clone()));
    let result = pipeline
        .run(ScrapeRequest::new("ExampleApp", 10))
        .await
        .unwrap();

    assert_eq!(store.table(&result.review_table_id).len(), 2);
    assert_eq!(result.positive_percentage, 50.0);
}

#[tokio::test]
async fn rerunning_a_query_uses_distinct_tables() {
    let store = MemoryStore::new();
    let texts = ["great app", "awful mess", "smooth experience"];

    let mut table_ids = Vec::new();
    for _ in 0..2 {
        let (locator, _) = FakeLocator::resolving("com.example.notes");
        let pipeline = ReviewPipeline::new(
            locator,
            FakeSource::with_texts(&texts),
            LexiconClassifier::new(),
            SharedStore(store.clone()),
        );
        let result = pipeline
            .run(ScrapeRequest::new("ExampleApp", 3))
            .await
            .unwrap();
        table_ids.push(result.review_table_id);
    }

    assert_ne!(table_ids[0], table_ids[1]);
    // Independent tables: neither run overwrote or merged the other.
    assert_eq!(store.table(&table_ids[0]).len(), 3);
    assert_eq!(store.table(&table_ids[1]).len(), 3);
}
