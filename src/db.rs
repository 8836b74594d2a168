//! Per-run append-only review storage.
//!
//! Every run gets a freshly named table with a fixed schema; only the
//! table name varies per run, so storage is effectively one logical
//! append-only store partitioned by run id. Each accepted review is
//! committed individually before the pipeline moves on, which is what
//! makes a mid-run failure leave all prior records durable. The pipeline
//! never updates or deletes rows in these tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::error::ScrapeError;
use crate::ml::ClassifiedReview;

/// One persisted review row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReviewRecord {
    pub id: i64,
    pub review: String,
    pub sentiment_label: String,
    pub sentiment_score: f64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Allocates a fresh, uniquely named table for one run and returns
    /// its identifier. Identifiers are never reused.
    async fn create_run(&self) -> Result<String, ScrapeError>;

    /// Commits one record durably before returning, assigning the next
    /// sequence id. No batching.
    async fn append(&self, table_id: &str, review: &ClassifiedReview) -> Result<i64, ScrapeError>;

    /// Reads back a run's table in insertion order.
    async fn fetch_run(&self, table_id: &str) -> Result<Vec<ReviewRecord>, ScrapeError>;
}

/// Table names are interpolated into DDL/DML, so only identifiers we
/// generated ourselves are allowed through.
fn validate_table_id(table_id: &str) -> Result<(), ScrapeError> {
    let well_formed = table_id.starts_with("reviews_")
        && table_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(ScrapeError::StorageWriteFailure(format!(
            "invalid review table id '{}'",
            table_id
        )))
    }
}

pub struct PgReviewStore {
    pool: PgPool,
}

impl PgReviewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewStore for PgReviewStore {
    async fn create_run(&self) -> Result<String, ScrapeError> {
        let table_id = format!("reviews_{}", Uuid::new_v4().simple());
        sqlx::query(&format!(
            r#"
            CREATE TABLE "{}" (
                id BIGSERIAL PRIMARY KEY,
                review TEXT NOT NULL,
                sentiment_label TEXT NOT NULL,
                sentiment_score DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            table_id
        ))
        .execute(&self.pool)
        .await?;

        tracing::info!(%table_id, "created review table");
        Ok(table_id)
    }

    async fn append(&self, table_id: &str, review: &ClassifiedReview) -> Result<i64, ScrapeError> {
        validate_table_id(table_id)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO "{}" (review, sentiment_label, sentiment_score)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
            table_id
        ))
        .bind(&review.text)
        .bind(review.label.to_string())
        .bind(review.score)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn fetch_run(&self, table_id: &str) -> Result<Vec<ReviewRecord>, ScrapeError> {
        validate_table_id(table_id)?;
        let records = sqlx::query_as::<_, ReviewRecord>(&format!(
            r#"
            SELECT id, review, sentiment_label, sentiment_score, created_at
            FROM "{}"
            ORDER BY id
            "#,
            table_id
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_generated_table_id() {
        let table_id = format!("reviews_{}", Uuid::new_v4().simple());
        assert!(validate_table_id(&table_id).is_ok());
    }

    #[test]
    fn test_validate_rejects_foreign_identifiers() {
        assert!(validate_table_id("tasks").is_err());
        assert!(validate_table_id("reviews_abc; DROP TABLE users").is_err());
        assert!(validate_table_id("reviews_ABC").is_err());
    }
}
