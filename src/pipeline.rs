//! Run orchestrator: one sequential pipeline per scrape request.
//!
//! State machine: Idle -> LocatingSource -> FetchingReviews -> Processing
//! -> Finalizing -> Completed, with Failed reachable from any non-terminal
//! state. Per review the loop is Normalize -> Dedup -> Classify ->
//! Store/Count; each step must complete before the dedup set and counters
//! advance, so there is no parallelism across reviews within a run. A
//! fault during Processing fails the run but leaves already-committed
//! records durable and queryable; nothing is rolled back.

use serde::{Deserialize, Serialize};

use crate::db::ReviewStore;
use crate::error::ScrapeError;
use crate::ml::{ClassifiedReview, Sentiment, SentimentClassifier};
use crate::reviews::{ReviewSource, SortOrder};
use crate::storefront::StorefrontLocator;
use crate::text::{normalize, Deduplicator};

/// One pipeline invocation. Immutable for the run's duration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeRequest {
    pub query: String,
    pub requested_count: usize,
}

impl ScrapeRequest {
    pub fn new(query: impl Into<String>, requested_count: usize) -> Self {
        Self {
            query: query.into(),
            requested_count,
        }
    }
}

/// The only data handed back to the caller. The table itself persists
/// independently of this value.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub positive_percentage: f64,
    pub review_table_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    LocatingSource,
    FetchingReviews,
    Processing,
    Finalizing,
    Completed,
    Failed,
}

impl RunState {
    fn name(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::LocatingSource => "locating_source",
            RunState::FetchingReviews => "fetching_reviews",
            RunState::Processing => "processing",
            RunState::Finalizing => "finalizing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

/// Running positive/total counts for one run.
///
/// Zero accepted reviews finalizes to 0.0 rather than faulting: the run
/// still completes with an empty table, consistent with short source
/// pages being a partial success.
#[derive(Debug, Default)]
pub struct Aggregator {
    positive: u64,
    total: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: Sentiment) {
        if label == Sentiment::Positive {
            self.positive += 1;
        }
        self.total += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn finalize(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.positive as f64 / self.total as f64 * 100.0
    }
}

pub struct ReviewPipeline<L, F, C, S> {
    locator: L,
    source: F,
    classifier: C,
    store: S,
    state: RunState,
}

impl<L, F, C, S> ReviewPipeline<L, F, C, S>
where
    L: StorefrontLocator,
    F: ReviewSource,
    C: SentimentClassifier,
    S: ReviewStore,
{
    pub fn new(locator: L, source: F, classifier: C, store: S) -> Self {
        Self {
            locator,
            source,
            classifier,
            store,
            state: RunState::Idle,
        }
    }

    fn transition(&mut self, next: RunState) {
        tracing::info!(from = self.state.name(), to = next.name(), "run state");
        self.state = next;
    }

    /// Executes one run to completion or failure. Consumes the pipeline:
    /// per-run state (dedup set, counters, session) never outlives the
    /// run, and the browser session is released on every exit path.
    pub async fn run(mut self, request: ScrapeRequest) -> Result<RunResult, ScrapeError> {
        let outcome = self.execute(&request).await;
        self.locator.close();
        match &outcome {
            Ok(result) => {
                tracing::info!(
                    table_id = %result.review_table_id,
                    positive_percentage = result.positive_percentage,
                    "run completed"
                );
            }
            Err(e) => {
                self.transition(RunState::Failed);
                tracing::error!(error = %e, "run failed; committed records are retained");
            }
        }
        outcome
    }

    async fn execute(&mut self, request: &ScrapeRequest) -> Result<RunResult, ScrapeError> {
        self.transition(RunState::LocatingSource);
        let handle = self.locator.locate(&request.query).await?;

        self.transition(RunState::FetchingReviews);
        let raw_reviews = self
            .source
            .fetch_page(&handle, SortOrder::MostRelevant, request.requested_count)
            .await?;
        if raw_reviews.len() < request.requested_count {
            // Source exhausted: proceed with the subset.
            tracing::warn!(
                requested = request.requested_count,
                fetched = raw_reviews.len(),
                "source returned fewer reviews than requested"
            );
        }

        self.transition(RunState::Processing);
        let table_id = self.store.create_run().await?;
        let mut dedup = Deduplicator::new();
        let mut aggregator = Aggregator::new();

        for raw in raw_reviews.iter().take(request.requested_count) {
            let Some(text) = normalize(raw.text.as_deref()) else {
                continue;
            };
            if !dedup.accept(&text) {
                continue;
            }

            let (label, score) = self.classifier.classify(&text).await?;
            let review = ClassifiedReview { text, label, score };
            self.store.append(&table_id, &review).await?;
            aggregator.record(label);
        }

        self.transition(RunState::Finalizing);
        if aggregator.total() == 0 {
            tracing::warn!(%table_id, "no reviews accepted; reporting 0%");
        }
        let positive_percentage = aggregator.finalize();

        self.transition(RunState::Completed);
        Ok(RunResult {
            positive_percentage,
            review_table_id: table_id,
        })
    }
}

/// Assembles the production capabilities and executes one run.
///
/// The classifier backend follows the environment: a configured
/// `SENTIMENT_API_URL` selects the remote model sidecar, otherwise the
/// in-process lexicon backend is used.
pub async fn run_scrape(
    pool: sqlx::PgPool,
    query: &str,
    requested_count: usize,
) -> Result<RunResult, ScrapeError> {
    use crate::db::PgReviewStore;
    use crate::ml::{LexiconClassifier, RemoteClassifier};
    use crate::reviews::PlayStoreReviews;
    use crate::storefront::PlayStoreLocator;

    let classifier: Box<dyn SentimentClassifier> = if std::env::var("SENTIMENT_API_URL").is_ok() {
        Box::new(RemoteClassifier::from_env())
    } else {
        Box::new(LexiconClassifier::new())
    };

    let pipeline = ReviewPipeline::new(
        PlayStoreLocator::from_env(),
        PlayStoreReviews::new(),
        classifier,
        PgReviewStore::new(pool),
    );
    pipeline
        .run(ScrapeRequest::new(query, requested_count))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregator_percentage() {
        let mut agg = Aggregator::new();
        agg.record(Sentiment::Positive);
        agg.record(Sentiment::Positive);
        agg.record(Sentiment::Negative);
        assert!((agg.finalize() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregator_bounds() {
        let mut all_positive = Aggregator::new();
        let mut all_negative = Aggregator::new();
        for _ in 0..5 {
            all_positive.record(Sentiment::Positive);
            all_negative.record(Sentiment::Negative);
        }
        assert_eq!(all_positive.finalize(), 100.0);
        assert_eq!(all_negative.finalize(), 0.0);
    }

    #[test]
    fn test_aggregator_empty_run_is_zero_percent() {
        assert_eq!(Aggregator::new().finalize(), 0.0);
    }
}
