//! Binary sentiment classification for normalized review text.
//!
//! Two backends behind one capability trait:
//! - `RemoteClassifier`: calls a local inference sidecar that serves the
//!   pinned DistilBERT SST-2 checkpoint. One HTTP client per process;
//!   the sidecar keeps the model resident, so per-review latency is one
//!   round trip, not one model load.
//! - `LexiconClassifier`: in-process word-list scoring for offline runs
//!   and tests. Deterministic, no network, no model files.
//!
//! A transport or model failure is `ClassifierUnavailable` and aborts
//! the run; it is never retried within a run.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::ScrapeError;

/// Model pin for the remote backend. Every call in a process lifetime
/// uses the same checkpoint, so scores are reproducible per text.
pub const MODEL_NAME: &str = "distilbert-base-uncased-finetuned-sst-2-english";
pub const MODEL_REVISION: &str = "af0f99b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Positive,
    Negative,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Positive => write!(f, "POSITIVE"),
            Sentiment::Negative => write!(f, "NEGATIVE"),
        }
    }
}

/// One review after classification. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedReview {
    pub text: String,
    pub label: Sentiment,
    pub score: f64,
}

#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    /// Returns the label and a confidence score in `[0, 1]`.
    async fn classify(&self, text: &str) -> Result<(Sentiment, f64), ScrapeError>;
}

#[async_trait]
impl SentimentClassifier for Box<dyn SentimentClassifier> {
    async fn classify(&self, text: &str) -> Result<(Sentiment, f64), ScrapeError> {
        (**self).classify(text).await
    }
}

// ============================================================================
// Remote sidecar backend
// ============================================================================

#[derive(Debug, Serialize)]
struct SentimentRequest<'a> {
    text: &'a str,
    model: &'static str,
    revision: &'static str,
}

#[derive(Debug, Deserialize)]
struct SentimentResponse {
    label: String,
    score: f64,
}

pub struct RemoteClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteClassifier {
    /// Reads `SENTIMENT_API_URL` (default `http://localhost:8000`) and
    /// builds the process-wide HTTP client once.
    pub fn from_env() -> Self {
        let base = std::env::var("SENTIMENT_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        Self::new(&base)
    }

    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/ml/sentiment", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl SentimentClassifier for RemoteClassifier {
    async fn classify(&self, text: &str) -> Result<(Sentiment, f64), ScrapeError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SentimentRequest {
                text,
                model: MODEL_NAME,
                revision: MODEL_REVISION,
            })
            .send()
            .await
            .map_err(|e| ScrapeError::ClassifierUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScrapeError::ClassifierUnavailable(format!(
                "sidecar returned {}",
                response.status()
            )));
        }

        let body: SentimentResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::ClassifierUnavailable(e.to_string()))?;

        let label = match body.label.as_str() {
            "POSITIVE" => Sentiment::Positive,
            "NEGATIVE" => Sentiment::Negative,
            other => {
                return Err(ScrapeError::ClassifierUnavailable(format!(
                    "unexpected label '{}' from sidecar",
                    other
                )))
            }
        };

        Ok((label, body.score.clamp(0.0, 1.0)))
    }
}

// ============================================================================
// In-process lexicon backend
// ============================================================================

// Word lists tuned to app-review vocabulary.
static POSITIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "good", "great", "excellent", "amazing", "awesome", "love", "loved",
        "best", "perfect", "fantastic", "wonderful", "smooth", "fast",
        "helpful", "easy", "reliable", "intuitive", "recommend", "recommended",
        "brilliant", "superb", "nice", "beautiful", "useful", "stable",
        "responsive", "handy", "enjoy", "enjoyable", "satisfied", "improved",
        "improvement", "flawless", "solid", "convenient", "polished",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "bad", "terrible", "awful", "horrible", "worst", "hate", "hated",
        "slow", "laggy", "lag", "crash", "crashes", "crashed", "crashing",
        "bug", "bugs", "buggy", "broken", "freeze", "freezes", "frozen",
        "useless", "annoying", "ads", "spam", "scam", "fraud", "fake",
        "uninstall", "uninstalled", "refund", "waste", "poor", "unusable",
        "disappointing", "disappointed", "error", "errors", "confusing",
    ]
    .into_iter()
    .collect()
});

/// Word-list classifier. The score is the share of matched sentiment
/// words on the winning side; ties and texts with no sentiment words
/// fall back to Positive at 0.5, keeping the output strictly binary.
#[derive(Debug, Default)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn new() -> Self {
        Self
    }

    fn score(text: &str) -> (Sentiment, f64) {
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| w.len() > 2)
            .collect();

        let positive = words.iter().filter(|w| POSITIVE_WORDS.contains(*w)).count();
        let negative = words.iter().filter(|w| NEGATIVE_WORDS.contains(*w)).count();
        let total = positive + negative;

        if total == 0 || positive == negative {
            return (Sentiment::Positive, 0.5);
        }

        if positive > negative {
            (Sentiment::Positive, positive as f64 / total as f64)
        } else {
            (Sentiment::Negative, negative as f64 / total as f64)
        }
    }
}

#[async_trait]
impl SentimentClassifier for LexiconClassifier {
    async fn classify(&self, text: &str) -> Result<(Sentiment, f64), ScrapeError> {
        Ok(Self::score(text))
    }
}
