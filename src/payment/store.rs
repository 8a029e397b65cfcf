use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};
use crate::membership::MembershipTier;
use crate::payment::OrderStatus;

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub product_type: MembershipTier,
    pub product_name: String,
    /// Amount actually charged; differs from `original_amount` when a coupon
    /// was applied.
    pub amount: f64,
    pub original_amount: Option<f64>,
    pub discount_amount: Option<f64>,
    pub coupon_code: Option<String>,
    pub payment_method: String,
    pub status: OrderStatus,
    pub trade_no: Option<String>,
    pub membership_duration_days: Option<i64>,
    pub membership_start_date: Option<DateTime<Utc>>,
    pub callback_received_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub callback_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: String,
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub product_type: MembershipTier,
    pub product_name: String,
    pub amount: f64,
    pub original_amount: Option<f64>,
    pub discount_amount: Option<f64>,
    pub coupon_code: Option<String>,
    pub payment_method: String,
    pub membership_duration_days: Option<i64>,
    pub client_ip: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: NewOrder) -> Result<(), AppError>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>, AppError>;

    /// Conditional pending→paid update. Returns false when the order was not
    /// in `pending`, which is how a replayed webhook loses the race.
    async fn mark_paid(
        &self,
        order_id: &str,
        trade_no: &str,
        callback_data: serde_json::Value,
    ) -> Result<bool, AppError>;

    async fn mark_completed(
        &self,
        order_id: &str,
        membership_start: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Roll back an order whose payment URL could not be built.
    async fn delete(&self, order_id: &str) -> Result<(), AppError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, AppError>;
}

pub struct PgOrderStore {
    pool: Arc<PgPool>,
}

impl PgOrderStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn from_row(row: &PgRow) -> Result<Order, AppError> {
        let product_type: String = row.try_get("product_type")?;
        let status: String = row.try_get("status")?;
        Ok(Order {
            order_id: row.try_get("order_id")?,
            user_id: row.try_get("user_id")?,
            user_email: row.try_get("user_email")?,
            product_type: MembershipTier::from_str(&product_type)
                .map_err(|e| AppError::DatabaseError(DatabaseError::QueryError(e)))?,
            product_name: row.try_get("product_name")?,
            amount: row.try_get("amount")?,
            original_amount: row.try_get("original_amount")?,
            discount_amount: row.try_get("discount_amount")?,
            coupon_code: row.try_get("coupon_code")?,
            payment_method: row.try_get("payment_method")?,
            status: OrderStatus::from_str(&status)
                .map_err(|e| AppError::DatabaseError(DatabaseError::QueryError(e)))?,
            trade_no: row.try_get("trade_no")?,
            membership_duration_days: row.try_get("membership_duration_days")?,
            membership_start_date: row.try_get("membership_start_date")?,
            callback_received_at: row.try_get("callback_received_at")?,
            callback_data: row.try_get("callback_data")?,
            created_at: row.try_get("created_at")?,
            client_ip: row.try_get("client_ip")?,
        })
    }
}

const SELECT_COLUMNS: &str = "order_id, user_id, user_email, product_type, product_name, amount, \
     original_amount, discount_amount, coupon_code, payment_method, status, trade_no, \
     membership_duration_days, membership_start_date, callback_received_at, callback_data, \
     created_at, client_ip";

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO orders
                 (order_id, user_id, user_email, product_type, product_name, amount,
                  original_amount, discount_amount, coupon_code, payment_method, status,
                  membership_duration_days, client_ip)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $12)",
        )
        .bind(order.order_id)
        .bind(order.user_id)
        .bind(order.user_email)
        .bind(order.product_type.as_str())
        .bind(order.product_name)
        .bind(order.amount)
        .bind(order.original_amount)
        .bind(order.discount_amount)
        .bind(order.coupon_code)
        .bind(order.payment_method)
        .bind(order.membership_duration_days)
        .bind(order.client_ip)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn mark_paid(
        &self,
        order_id: &str,
        trade_no: &str,
        callback_data: serde_json::Value,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE orders
             SET status = 'paid', trade_no = $2, callback_received_at = now(),
                 callback_data = $3
             WHERE order_id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(trade_no)
        .bind(callback_data)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        order_id: &str,
        membership_start: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE orders
             SET status = 'completed', membership_start_date = $2
             WHERE order_id = $1 AND status = 'paid'",
        )
        .bind(order_id)
        .bind(membership_start)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn delete(&self, order_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM orders WHERE order_id = $1")
            .bind(order_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM orders
             WHERE user_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(Self::from_row).collect()
    }
}
