use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;

/// One bargain attempt per user, lifetime. The coupon rides on the same row.
#[derive(Debug, Clone, Serialize)]
pub struct BargainAttempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub reason: String,
    pub ai_score: i32,
    pub ai_message: String,
    pub discount_percent: i32,
    pub original_price: f64,
    pub final_price: f64,
    pub coupon_code: String,
    pub coupon_expires_at: DateTime<Utc>,
    pub coupon_used: bool,
    pub coupon_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub client_ip: Option<String>,
    #[serde(skip)]
    pub user_agent: Option<String>,
}

/// Insert payload; the row id and created_at come from the database.
#[derive(Debug, Clone)]
pub struct NewBargainAttempt {
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub reason: String,
    pub ai_score: i32,
    pub ai_message: String,
    pub discount_percent: i32,
    pub original_price: f64,
    pub final_price: f64,
    pub coupon_code: String,
    pub coupon_expires_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BargainStore: Send + Sync {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<BargainAttempt>, AppError>;

    async fn find_by_coupon(&self, coupon_code: &str) -> Result<Option<BargainAttempt>, AppError>;

    /// Fails with `DatabaseError::Duplicate` when the user already has a row
    /// (unique constraint on `user_id`).
    async fn insert(&self, attempt: NewBargainAttempt) -> Result<BargainAttempt, AppError>;

    /// QA accounts bargain repeatedly; their previous row is cleared first.
    async fn delete_for_user(&self, user_id: Uuid) -> Result<(), AppError>;

    async fn mark_coupon_used(&self, coupon_code: &str) -> Result<(), AppError>;
}

pub struct PgBargainStore {
    pool: Arc<PgPool>,
}

impl PgBargainStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<BargainAttempt, AppError> {
        Ok(BargainAttempt {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            user_email: row.try_get("user_email")?,
            reason: row.try_get("reason")?,
            ai_score: row.try_get("ai_score")?,
            ai_message: row.try_get("ai_message")?,
            discount_percent: row.try_get("discount_percent")?,
            original_price: row.try_get("original_price")?,
            final_price: row.try_get("final_price")?,
            coupon_code: row.try_get("coupon_code")?,
            coupon_expires_at: row.try_get("coupon_expires_at")?,
            coupon_used: row.try_get("coupon_used")?,
            coupon_used_at: row.try_get("coupon_used_at")?,
            created_at: row.try_get("created_at")?,
            client_ip: row.try_get("client_ip")?,
            user_agent: row.try_get("user_agent")?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, user_id, user_email, reason, ai_score, ai_message, \
     discount_percent, original_price, final_price, coupon_code, coupon_expires_at, \
     coupon_used, coupon_used_at, created_at, client_ip, user_agent";

#[async_trait]
impl BargainStore for PgBargainStore {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<BargainAttempt>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM bargain_attempts WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn find_by_coupon(&self, coupon_code: &str) -> Result<Option<BargainAttempt>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM bargain_attempts WHERE coupon_code = $1"
        ))
        .bind(coupon_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn insert(&self, attempt: NewBargainAttempt) -> Result<BargainAttempt, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO bargain_attempts
                 (user_id, user_email, reason, ai_score, ai_message, discount_percent,
                  original_price, final_price, coupon_code, coupon_expires_at,
                  coupon_used, client_ip, user_agent)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, false, $11, $12)
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(attempt.user_id)
        .bind(attempt.user_email)
        .bind(attempt.reason)
        .bind(attempt.ai_score)
        .bind(attempt.ai_message)
        .bind(attempt.discount_percent)
        .bind(attempt.original_price)
        .bind(attempt.final_price)
        .bind(attempt.coupon_code)
        .bind(attempt.coupon_expires_at)
        .bind(attempt.client_ip)
        .bind(attempt.user_agent)
        .fetch_one(self.pool.as_ref())
        .await?;

        Self::from_row(&row)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM bargain_attempts WHERE user_id = $1")
            .bind(user_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn mark_coupon_used(&self, coupon_code: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE bargain_attempts
             SET coupon_used = true, coupon_used_at = now()
             WHERE coupon_code = $1",
        )
        .bind(coupon_code)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }
}
