//! Review acquisition pipeline.
//!
//! Given an application name, drives a headless Chrome session to locate
//! the app's storefront entry, pulls a bounded batch of reviews from the
//! paginated review API, normalizes and deduplicates the text, scores
//! each review's sentiment, and persists one record per accepted review
//! into a freshly named append-only Postgres table. The caller gets back
//! the positive-review percentage and the run's table identifier.

pub mod db;
pub mod error;
pub mod ml;
pub mod pipeline;
pub mod registry;
pub mod reviews;
pub mod storefront;
pub mod text;

pub use db::{PgReviewStore, ReviewRecord, ReviewStore};
pub use error::ScrapeError;
pub use ml::{ClassifiedReview, LexiconClassifier, RemoteClassifier, Sentiment, SentimentClassifier};
pub use pipeline::{run_scrape, ReviewPipeline, RunResult, ScrapeRequest};
pub use registry::RunRegistry;
pub use reviews::{PlayStoreReviews, RawReview, ReviewSource, SortOrder};
pub use storefront::{PlayStoreLocator, SourceHandle, StorefrontLocator};
