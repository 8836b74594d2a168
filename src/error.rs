//! Run-level error taxonomy.
//!
//! Every variant here is fatal to the run that raised it: the pipeline
//! surfaces it to the caller as a failed run and never retries. Reviews
//! already committed before the failure stay durable (the store is
//! append-only, each record is independent). "Fewer reviews than
//! requested" is deliberately NOT in this enum; that is a partial-success
//! condition the pipeline handles inline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScrapeError>;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The storefront search produced no matching entry within the
    /// bounded wait.
    #[error("no storefront entry matched query '{0}'")]
    NotFound(String),

    /// A required page element never became ready within its wait budget.
    #[error("page element '{element}' not ready after {waited_ms}ms")]
    UiInteractionTimeout { element: String, waited_ms: u64 },

    /// Browser launch, navigation, or script evaluation failed outright.
    #[error("browser session error: {0}")]
    Browser(String),

    /// The paginated review source could not be reached or returned an
    /// unreadable payload.
    #[error("review source request failed: {0}")]
    Source(String),

    /// The sentiment model could not be loaded or queried.
    #[error("sentiment classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// A single-record append could not be committed.
    #[error("review append could not be committed: {0}")]
    StorageWriteFailure(String),
}

impl ScrapeError {
    /// Wraps a `headless_chrome` (anyhow) error from the page driver.
    pub fn browser(err: impl std::fmt::Display) -> Self {
        ScrapeError::Browser(err.to_string())
    }
}

impl From<sqlx::Error> for ScrapeError {
    fn from(err: sqlx::Error) -> Self {
        ScrapeError::StorageWriteFailure(err.to_string())
    }
}
