use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::membership::MembershipTier;

/// One row per user. Mutated only by payment activation or cancellation.
#[derive(Debug, Clone)]
pub struct UserMembership {
    pub user_id: Uuid,
    pub tier: MembershipTier,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserMembership>, AppError>;

    /// Upsert by user id (the natural key).
    async fn upsert(
        &self,
        user_id: Uuid,
        tier: MembershipTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError>;

    /// Reset to free/null.
    async fn cancel(&self, user_id: Uuid) -> Result<(), AppError>;
}

pub struct PgMembershipStore {
    pool: Arc<PgPool>,
}

impl PgMembershipStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn from_row(row: PgRow) -> Result<UserMembership, AppError> {
        let tier: String = row.try_get("tier").map_err(AppError::from)?;
        let tier = MembershipTier::from_str(&tier)
            .map_err(crate::error::DatabaseError::QueryError)?;

        Ok(UserMembership {
            user_id: row.try_get("user_id").map_err(AppError::from)?,
            tier,
            expires_at: row.try_get("expires_at").map_err(AppError::from)?,
            created_at: row.try_get("created_at").map_err(AppError::from)?,
            updated_at: row.try_get("updated_at").map_err(AppError::from)?,
        })
    }
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserMembership>, AppError> {
        let row = sqlx::query(
            "SELECT user_id, tier, expires_at, created_at, updated_at
             FROM user_memberships WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Self::from_row).transpose()
    }

    async fn upsert(
        &self,
        user_id: Uuid,
        tier: MembershipTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO user_memberships (user_id, tier, expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, now(), now())
             ON CONFLICT (user_id)
             DO UPDATE SET tier = $2, expires_at = $3, updated_at = now()",
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(expires_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn cancel(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE user_memberships
             SET tier = 'free', expires_at = NULL, updated_at = now()
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}
