//! Paginated review source client.
//!
//! The pipeline consumes this as a capability: one call for the full
//! requested count, most-relevant ordering. The production
//! implementation posts to the Play store's `batchexecute` RPC endpoint
//! and digs the review content out of its nested JSON envelope. A short
//! page is not an error; the pipeline proceeds with what arrived.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ScrapeError;
use crate::storefront::SourceHandle;

const BATCH_URL: &str = "https://play.google.com/_/PlayStoreUi/data/batchexecute?hl=en&gl=us";
const REVIEWS_RPC_ID: &str = "UsvDTd";

/// One page-provided review before processing. `text` may be missing;
/// the normalizer decides what survives.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReview {
    pub text: Option<String>,
}

impl RawReview {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    MostRelevant,
    Newest,
    Rating,
}

impl SortOrder {
    fn code(self) -> u8 {
        match self {
            SortOrder::MostRelevant => 1,
            SortOrder::Newest => 2,
            SortOrder::Rating => 3,
        }
    }
}

#[async_trait]
pub trait ReviewSource: Send + Sync {
    /// Fetches up to `count` reviews for the app behind `handle`.
    /// Returning fewer than `count` is normal (the source is exhausted).
    async fn fetch_page(
        &self,
        handle: &SourceHandle,
        sort: SortOrder,
        count: usize,
    ) -> Result<Vec<RawReview>, ScrapeError>;
}

pub struct PlayStoreReviews {
    client: reqwest::Client,
    endpoint: String,
}

impl PlayStoreReviews {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: BATCH_URL.to_string(),
        }
    }

    /// Builds the `f.req` form body for the reviews RPC.
    fn request_body(app_id: &str, sort: SortOrder, count: usize) -> String {
        let inner = serde_json::json!([
            null,
            null,
            [2, sort.code(), [count, null, null], null, []],
            [app_id, 7]
        ])
        .to_string();
        let envelope =
            serde_json::json!([[[REVIEWS_RPC_ID, inner, null, "generic"]]]).to_string();
        format!("f.req={}", urlencoding::encode(&envelope))
    }

    /// Unwraps the batchexecute envelope down to the review array.
    ///
    /// The response body starts with an anti-JSON prefix line, then a
    /// JSON frame whose `[0][2]` element is itself a JSON-encoded string
    /// holding `[reviews, continuation]`; each review is a positional
    /// array with the content at index 4.
    fn parse_reviews(body: &str) -> Result<Vec<RawReview>, ScrapeError> {
        let json_start = body
            .find('\n')
            .map(|i| &body[i..])
            .unwrap_or(body);
        let frame: serde_json::Value = serde_json::from_str(json_start.trim())
            .map_err(|e| ScrapeError::Source(format!("bad envelope: {}", e)))?;

        let payload = frame
            .get(0)
            .and_then(|v| v.get(2))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ScrapeError::Source("missing rpc payload".to_string()))?;
        let parsed: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| ScrapeError::Source(format!("bad rpc payload: {}", e)))?;

        let reviews = match parsed.get(0).and_then(|v| v.as_array()) {
            Some(list) => list,
            // An app with no reviews yields a null payload; that is
            // exhaustion, not failure.
            None => return Ok(Vec::new()),
        };

        Ok(reviews
            .iter()
            .map(|entry| RawReview {
                text: entry
                    .get(4)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            })
            .collect())
    }
}

impl Default for PlayStoreReviews {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReviewSource for PlayStoreReviews {
    async fn fetch_page(
        &self,
        handle: &SourceHandle,
        sort: SortOrder,
        count: usize,
    ) -> Result<Vec<RawReview>, ScrapeError> {
        tracing::info!(app_id = handle.as_str(), count, "fetching review page");
        let response = self
            .client
            .post(&self.endpoint)
            .header(
                "content-type",
                "application/x-www-form-urlencoded;charset=UTF-8",
            )
            .body(Self::request_body(handle.as_str(), sort, count))
            .send()
            .await
            .map_err(|e| ScrapeError::Source(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ScrapeError::Source(format!(
                "review endpoint returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::Source(e.to_string()))?;
        let reviews = Self::parse_reviews(&body)?;
        tracing::info!(fetched = reviews.len(), "review page parsed");
        Ok(reviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_encodes_sort_and_count() {
        let body = PlayStoreReviews::request_body("com.example.app", SortOrder::MostRelevant, 50);
        assert!(body.starts_with("f.req="));
        let decoded = urlencoding::decode(&body["f.req=".len()..]).unwrap();
        assert!(decoded.contains("UsvDTd"));
        assert!(decoded.contains("com.example.app"));
        assert!(decoded.contains("[50,null,null]"));
    }

    #[test]
    fn test_parse_reviews_unwraps_envelope() {
        let inner = serde_json::json!([
            [
                ["r1", null, null, null, "Great app, works well"],
                ["r2", null, null, null, null]
            ],
            null
        ])
        .to_string();
        let body = format!(
            ")]}}'\n{}",
            serde_json::json!([["wrb.fr", null, inner]]).to_string()
        );

        let reviews = PlayStoreReviews::parse_reviews(&body).unwrap();
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].text.as_deref(), Some("Great app, works well"));
        assert!(reviews[1].text.is_none());
    }

    #[test]
    fn test_parse_reviews_null_payload_is_empty() {
        let body = format!(
            ")]}}'\n{}",
            serde_json::json!([["wrb.fr", null, "[null,null]"]]).to_string()
        );
        let reviews = PlayStoreReviews::parse_reviews(&body).unwrap();
        assert!(reviews.is_empty());
    }

    #[test]
    fn test_parse_reviews_garbage_is_source_error() {
        let err = PlayStoreReviews::parse_reviews("not json at all").unwrap_err();
        assert!(matches!(err, ScrapeError::Source(_)));
    }
}
