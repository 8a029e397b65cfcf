//! In-memory collaborators for integration tests: same trait contracts as
//! the Postgres stores, including the uniqueness semantics the services
//! lean on.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use jiangzao_server::access::{ViewRecord, ViewStore};
use jiangzao_server::bargain::scorer::{AiScorer, Evaluation};
use jiangzao_server::bargain::{BargainAttempt, BargainStore, NewBargainAttempt};
use jiangzao_server::content::{ContentItem, ContentSource, ContentStatus};
use jiangzao_server::error::{AppError, DatabaseError};
use jiangzao_server::membership::{MembershipStore, MembershipTier, UserMembership};
use jiangzao_server::payment::{NewOrder, Order, OrderStatus, OrderStore};

pub fn published_item(id: &str, body: &str) -> ContentItem {
    ContentItem {
        id: id.to_string(),
        title: format!("节目 {id}"),
        guest: "张三".to_string(),
        source: "某播客".to_string(),
        tags: vec!["科技".to_string()],
        body: body.to_string(),
        original_link: None,
        status: ContentStatus::Published,
        published_at: Some(Utc::now()),
    }
}

pub struct StaticContentSource {
    items: HashMap<String, ContentItem>,
}

impl StaticContentSource {
    pub fn new(items: Vec<ContentItem>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
        }
    }
}

#[async_trait]
impl ContentSource for StaticContentSource {
    async fn fetch(&self, content_id: &str) -> Result<Option<ContentItem>, AppError> {
        Ok(self.items.get(content_id).cloned())
    }

    async fn list_published(&self) -> Result<Vec<ContentItem>, AppError> {
        Ok(self
            .items
            .values()
            .filter(|i| i.is_published())
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryViewStore {
    records: Mutex<HashMap<(Uuid, String, NaiveDate), DateTime<Utc>>>,
}

impl InMemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl ViewStore for InMemoryViewStore {
    async fn count_monthly_views(
        &self,
        user_id: Uuid,
        month_start: NaiveDate,
    ) -> Result<u32, AppError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .keys()
            .filter(|(u, _, m)| *u == user_id && *m == month_start)
            .count() as u32)
    }

    async fn has_viewed(
        &self,
        user_id: Uuid,
        content_id: &str,
        month_start: NaiveDate,
    ) -> Result<bool, AppError> {
        let records = self.records.lock().unwrap();
        Ok(records.contains_key(&(user_id, content_id.to_string(), month_start)))
    }

    async fn record_view(
        &self,
        user_id: Uuid,
        content_id: &str,
        month_start: NaiveDate,
    ) -> Result<(), AppError> {
        let mut records = self.records.lock().unwrap();
        records.insert((user_id, content_id.to_string(), month_start), Utc::now());
        Ok(())
    }

    async fn recent_views(
        &self,
        user_id: Uuid,
        month_start: NaiveDate,
        limit: i64,
    ) -> Result<Vec<ViewRecord>, AppError> {
        let records = self.records.lock().unwrap();
        let mut views: Vec<ViewRecord> = records
            .iter()
            .filter(|((u, _, m), _)| *u == user_id && *m == month_start)
            .map(|((_, content_id, _), at)| ViewRecord {
                content_id: content_id.clone(),
                last_viewed_at: *at,
            })
            .collect();
        views.sort_by(|a, b| b.last_viewed_at.cmp(&a.last_viewed_at));
        views.truncate(limit as usize);
        Ok(views)
    }
}

/// Every read and write fails; used to probe the fail-open paths.
pub struct FailingViewStore;

#[async_trait]
impl ViewStore for FailingViewStore {
    async fn count_monthly_views(&self, _: Uuid, _: NaiveDate) -> Result<u32, AppError> {
        Err(AppError::DatabaseError(DatabaseError::ConnectionError(
            "down".into(),
        )))
    }

    async fn has_viewed(&self, _: Uuid, _: &str, _: NaiveDate) -> Result<bool, AppError> {
        Err(AppError::DatabaseError(DatabaseError::ConnectionError(
            "down".into(),
        )))
    }

    async fn record_view(&self, _: Uuid, _: &str, _: NaiveDate) -> Result<(), AppError> {
        Err(AppError::DatabaseError(DatabaseError::ConnectionError(
            "down".into(),
        )))
    }

    async fn recent_views(&self, _: Uuid, _: NaiveDate, _: i64) -> Result<Vec<ViewRecord>, AppError> {
        Err(AppError::DatabaseError(DatabaseError::ConnectionError(
            "down".into(),
        )))
    }
}

#[derive(Default)]
pub struct InMemoryMembershipStore {
    rows: Mutex<HashMap<Uuid, UserMembership>>,
}

impl InMemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, membership: UserMembership) {
        self.rows
            .lock()
            .unwrap()
            .insert(membership.user_id, membership);
    }

    pub fn expiry_of(&self, user_id: Uuid) -> Option<Option<DateTime<Utc>>> {
        self.rows
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|m| m.expires_at)
    }
}

#[async_trait]
impl MembershipStore for InMemoryMembershipStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserMembership>, AppError> {
        Ok(self.rows.lock().unwrap().get(&user_id).cloned())
    }

    async fn upsert(
        &self,
        user_id: Uuid,
        tier: MembershipTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut rows = self.rows.lock().unwrap();
        let now = Utc::now();
        rows.entry(user_id)
            .and_modify(|m| {
                m.tier = tier;
                m.expires_at = expires_at;
                m.updated_at = now;
            })
            .or_insert(UserMembership {
                user_id,
                tier,
                expires_at,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn cancel(&self, user_id: Uuid) -> Result<(), AppError> {
        self.upsert(user_id, MembershipTier::Free, None).await
    }
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    rows: Mutex<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, order_id: &str) -> Option<OrderStatus> {
        self.rows.lock().unwrap().get(order_id).map(|o| o.status)
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<(), AppError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&order.order_id) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }
        rows.insert(
            order.order_id.clone(),
            Order {
                order_id: order.order_id,
                user_id: order.user_id,
                user_email: order.user_email,
                product_type: order.product_type,
                product_name: order.product_name,
                amount: order.amount,
                original_amount: order.original_amount,
                discount_amount: order.discount_amount,
                coupon_code: order.coupon_code,
                payment_method: order.payment_method,
                status: OrderStatus::Pending,
                trade_no: None,
                membership_duration_days: order.membership_duration_days,
                membership_start_date: None,
                callback_received_at: None,
                callback_data: None,
                created_at: Utc::now(),
                client_ip: order.client_ip,
            },
        );
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Order>, AppError> {
        Ok(self.rows.lock().unwrap().get(order_id).cloned())
    }

    async fn mark_paid(
        &self,
        order_id: &str,
        trade_no: &str,
        callback_data: serde_json::Value,
    ) -> Result<bool, AppError> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(order_id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Paid;
                order.trade_no = Some(trade_no.to_string());
                order.callback_received_at = Some(Utc::now());
                order.callback_data = Some(callback_data);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        order_id: &str,
        membership_start: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(order) = rows.get_mut(order_id) {
            if order.status == OrderStatus::Paid {
                order.status = OrderStatus::Completed;
                order.membership_start_date = Some(membership_start);
            }
        }
        Ok(())
    }

    async fn delete(&self, order_id: &str) -> Result<(), AppError> {
        self.rows.lock().unwrap().remove(order_id);
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, AppError> {
        let rows = self.rows.lock().unwrap();
        let mut orders: Vec<Order> = rows
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[derive(Default)]
pub struct InMemoryBargainStore {
    rows: Mutex<HashMap<Uuid, BargainAttempt>>,
}

impl InMemoryBargainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coupon_used(&self, coupon_code: &str) -> Option<bool> {
        self.rows
            .lock()
            .unwrap()
            .values()
            .find(|a| a.coupon_code == coupon_code)
            .map(|a| a.coupon_used)
    }
}

#[async_trait]
impl BargainStore for InMemoryBargainStore {
    async fn find_by_user(&self, user_id: Uuid) -> Result<Option<BargainAttempt>, AppError> {
        Ok(self.rows.lock().unwrap().get(&user_id).cloned())
    }

    async fn find_by_coupon(&self, coupon_code: &str) -> Result<Option<BargainAttempt>, AppError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .find(|a| a.coupon_code == coupon_code)
            .cloned())
    }

    async fn insert(&self, attempt: NewBargainAttempt) -> Result<BargainAttempt, AppError> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&attempt.user_id) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }
        let stored = BargainAttempt {
            id: Uuid::new_v4(),
            user_id: attempt.user_id,
            user_email: attempt.user_email,
            reason: attempt.reason,
            ai_score: attempt.ai_score,
            ai_message: attempt.ai_message,
            discount_percent: attempt.discount_percent,
            original_price: attempt.original_price,
            final_price: attempt.final_price,
            coupon_code: attempt.coupon_code,
            coupon_expires_at: attempt.coupon_expires_at,
            coupon_used: false,
            coupon_used_at: None,
            created_at: Utc::now(),
            client_ip: attempt.client_ip,
            user_agent: attempt.user_agent,
        };
        rows.insert(stored.user_id, stored.clone());
        Ok(stored)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        self.rows.lock().unwrap().remove(&user_id);
        Ok(())
    }

    async fn mark_coupon_used(&self, coupon_code: &str) -> Result<(), AppError> {
        let mut rows = self.rows.lock().unwrap();
        for attempt in rows.values_mut() {
            if attempt.coupon_code == coupon_code {
                attempt.coupon_used = true;
                attempt.coupon_used_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

/// Scorer with a fixed verdict (or a fixed failure).
pub struct ScriptedScorer {
    outcome: Result<Evaluation, String>,
}

impl ScriptedScorer {
    pub fn verdict(evaluation: Evaluation) -> Self {
        Self {
            outcome: Ok(evaluation),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: Err("scorer offline".to_string()),
        }
    }
}

#[async_trait]
impl AiScorer for ScriptedScorer {
    async fn evaluate(&self, _reason: &str) -> Result<Evaluation, AppError> {
        self.outcome
            .clone()
            .map_err(AppError::UpstreamFailure)
    }
}
