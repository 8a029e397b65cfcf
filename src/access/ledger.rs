//! View ledger: per-user, per-content, per-business-month view records.
//!
//! Only authenticated users are tracked server-side; anonymous quota lives in
//! client storage by design. Correctness under concurrent requests comes from
//! the `(user_id, content_id, month_start)` unique constraint, not locks.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ViewRecord {
    pub content_id: String,
    pub last_viewed_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Distinct contents viewed by the user in the given business month.
    async fn count_monthly_views(
        &self,
        user_id: Uuid,
        month_start: NaiveDate,
    ) -> Result<u32, AppError>;

    async fn has_viewed(
        &self,
        user_id: Uuid,
        content_id: &str,
        month_start: NaiveDate,
    ) -> Result<bool, AppError>;

    /// Insert-or-ignore on the natural key; a repeat view only bumps the
    /// last-viewed timestamp and never raises or double-counts.
    async fn record_view(
        &self,
        user_id: Uuid,
        content_id: &str,
        month_start: NaiveDate,
    ) -> Result<(), AppError>;

    /// Most recently viewed records for the month, newest first.
    async fn recent_views(
        &self,
        user_id: Uuid,
        month_start: NaiveDate,
        limit: i64,
    ) -> Result<Vec<ViewRecord>, AppError>;
}

pub struct PgViewStore {
    pool: Arc<PgPool>,
}

impl PgViewStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ViewStore for PgViewStore {
    async fn count_monthly_views(
        &self,
        user_id: Uuid,
        month_start: NaiveDate,
    ) -> Result<u32, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM content_monthly_views
             WHERE user_id = $1 AND month_start = $2",
        )
        .bind(user_id)
        .bind(month_start)
        .fetch_one(self.pool.as_ref())
        .await?;

        let n: i64 = row.try_get("n")?;
        Ok(n as u32)
    }

    async fn has_viewed(
        &self,
        user_id: Uuid,
        content_id: &str,
        month_start: NaiveDate,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            "SELECT 1 AS one FROM content_monthly_views
             WHERE user_id = $1 AND content_id = $2 AND month_start = $3",
        )
        .bind(user_id)
        .bind(content_id)
        .bind(month_start)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.is_some())
    }

    async fn record_view(
        &self,
        user_id: Uuid,
        content_id: &str,
        month_start: NaiveDate,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO content_monthly_views (user_id, content_id, month_start, last_viewed_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (user_id, content_id, month_start)
             DO UPDATE SET last_viewed_at = now()",
        )
        .bind(user_id)
        .bind(content_id)
        .bind(month_start)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn recent_views(
        &self,
        user_id: Uuid,
        month_start: NaiveDate,
        limit: i64,
    ) -> Result<Vec<ViewRecord>, AppError> {
        let rows = sqlx::query(
            "SELECT content_id, last_viewed_at FROM content_monthly_views
             WHERE user_id = $1 AND month_start = $2
             ORDER BY last_viewed_at DESC
             LIMIT $3",
        )
        .bind(user_id)
        .bind(month_start)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ViewRecord {
                    content_id: row.try_get("content_id")?,
                    last_viewed_at: row.try_get("last_viewed_at")?,
                })
            })
            .collect()
    }
}
