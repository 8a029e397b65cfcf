//! Metered content-access resolution.
//!
//! Single decision point for "full content or teaser": page and API callers
//! both go through [`AccessService::resolve`] so the bypass/quota precedence
//! cannot drift between call sites.

pub mod bots;
pub mod clock;
pub mod handlers;
pub mod identity;
pub mod ledger;
pub mod truncate;

pub use identity::{AnonIdentity, Identity, ANON_COOKIE_MAX_AGE_SECONDS, ANON_COOKIE_NAME};
pub use ledger::{PgViewStore, ViewRecord, ViewStore};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AccessConfig;
use crate::content::{ContentItem, ContentSource};
use crate::error::AppError;
use crate::membership::{evaluate_status, MembershipStatus, MembershipStore};

/// Sentinel for "no limit" in `max_views` / `remaining_views`.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub content_id: String,
    pub user_id: Option<Uuid>,
    /// Present only for unauthenticated requests.
    pub anon: Option<AnonIdentity>,
    pub user_agent: String,
    /// Client-reported anonymous stats. Not server-verified; clearing client
    /// storage resets them. Accepted trade-off, see the ledger module docs.
    pub anon_view_count: u32,
    pub anon_has_viewed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessResult {
    /// Body replaced by the teaser when access is denied.
    pub content: ContentItem,
    pub has_access: bool,
    pub is_truncated: bool,
    pub is_authenticated: bool,
    pub is_member: bool,
    pub membership: Option<MembershipStatus>,
    pub has_viewed_this_content: bool,
    pub view_count: i64,
    pub max_views: i64,
    pub remaining_views: i64,
    pub reset_date: String,
    pub days_until_reset: i64,
    pub timezone: String,
    #[serde(skip)]
    pub should_set_anon_cookie: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anon_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentViewItem {
    pub content_id: String,
    pub viewed_at: DateTime<Utc>,
    pub title: String,
    pub guest: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadingStats {
    pub view_count: i64,
    pub max_views: i64,
    pub remaining_views: i64,
    pub reset_date: String,
    pub days_until_reset: i64,
    pub timezone: String,
    pub recent_views: Vec<RecentViewItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackViewStats {
    pub view_count: i64,
    pub max_views: i64,
    pub remaining_views: i64,
}

pub struct AccessService {
    content: Arc<dyn ContentSource>,
    views: Arc<dyn ViewStore>,
    memberships: Arc<dyn MembershipStore>,
    config: AccessConfig,
    tz: Tz,
}

struct ResetInfo {
    reset_date: String,
    days_until_reset: i64,
}

impl AccessService {
    pub fn new(
        content: Arc<dyn ContentSource>,
        views: Arc<dyn ViewStore>,
        memberships: Arc<dyn MembershipStore>,
        config: AccessConfig,
    ) -> Result<Self, AppError> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| AppError::ConfigError(format!("invalid timezone: {}", config.timezone)))?;

        Ok(Self {
            content,
            views,
            memberships,
            config,
            tz,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn reset_info(&self, now: DateTime<Utc>) -> ResetInfo {
        let reset = clock::next_month_reset_date(now, self.tz);
        ResetInfo {
            reset_date: clock::date_key(reset),
            days_until_reset: clock::days_until_reset(reset, now, self.tz),
        }
    }

    /// Decide access for one content item. Precedence: existence →
    /// crawler bypass → kill-switch → active membership → already-viewed →
    /// quota. Only the final under-quota branch writes to the ledger.
    pub async fn resolve(
        &self,
        req: &ResolveRequest,
        now: DateTime<Utc>,
    ) -> Result<AccessResult, AppError> {
        let content = self
            .content
            .fetch(&req.content_id)
            .await?
            .filter(ContentItem::is_published)
            .ok_or_else(|| AppError::NotFound("内容不存在".into()))?;

        let reset = self.reset_info(now);
        let is_authenticated = req.user_id.is_some();

        if bots::is_search_bot(&req.user_agent) {
            return Ok(self.full_access(content, reset, is_authenticated, None, Some("search-bot")));
        }

        if !self.config.metering_enabled {
            return Ok(self.full_access(
                content,
                reset,
                is_authenticated,
                None,
                Some("feature-disabled"),
            ));
        }

        match req.user_id {
            Some(user_id) => self.resolve_authenticated(content, user_id, reset, now).await,
            None => Ok(self.resolve_anonymous(content, req, reset)),
        }
    }

    async fn resolve_authenticated(
        &self,
        content: ContentItem,
        user_id: Uuid,
        reset: ResetInfo,
        now: DateTime<Utc>,
    ) -> Result<AccessResult, AppError> {
        let membership = match self.memberships.get(user_id).await {
            Ok(m) => m,
            Err(e) => {
                // Fail open: an entitlement read hiccup must not paywall a
                // member.
                warn!(user_id = %user_id, error = %e, "membership lookup failed, granting access");
                return Ok(self.full_access(content, reset, true, None, None));
            }
        };
        let status = evaluate_status(membership.as_ref(), now);

        if status.is_active {
            return Ok(self.full_access(content, reset, true, Some(status), None));
        }

        let month_start = clock::business_month_start(now, self.tz);
        let quota = self.config.auth_user_max_views as i64;

        let view_count = match self.views.count_monthly_views(user_id, month_start).await {
            Ok(n) => n as i64,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "view count query failed, granting access");
                return Ok(self.full_access(content, reset, true, Some(status), None));
            }
        };

        let has_viewed = self
            .views
            .has_viewed(user_id, &content.id, month_start)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id = %user_id, error = %e, "has_viewed query failed");
                false
            });

        if has_viewed {
            // Quota for this item was already consumed this month.
            return Ok(self.metered_result(
                content, true, true, Some(status), true, view_count, quota, reset, None,
            ));
        }

        if view_count < quota {
            if let Err(e) = self.views.record_view(user_id, &content.id, month_start).await {
                // The unique constraint makes duplicates harmless; other
                // failures only lose one count, so keep serving.
                warn!(user_id = %user_id, content_id = %content.id, error = %e, "record_view failed");
            }
            return Ok(self.metered_result(
                content,
                true,
                true,
                Some(status),
                false,
                view_count + 1,
                quota,
                reset,
                None,
            ));
        }

        info!(user_id = %user_id, content_id = %content.id, view_count, "quota exhausted, serving teaser");
        Ok(self.metered_result(
            content, false, true, Some(status), false, view_count, quota, reset, None,
        ))
    }

    fn resolve_anonymous(
        &self,
        content: ContentItem,
        req: &ResolveRequest,
        reset: ResetInfo,
    ) -> AccessResult {
        let quota = self.config.free_user_max_views as i64;
        let view_count = req.anon_view_count as i64;
        let anon = req.anon.clone();

        if req.anon_has_viewed {
            return self.metered_result(
                content, true, false, None, true, view_count, quota, reset, anon,
            );
        }

        if view_count < quota {
            // The client persists the increment; the server only reports it.
            return self.metered_result(
                content,
                true,
                false,
                None,
                false,
                view_count + 1,
                quota,
                reset,
                anon,
            );
        }

        self.metered_result(content, false, false, None, false, view_count, quota, reset, anon)
    }

    fn full_access(
        &self,
        content: ContentItem,
        reset: ResetInfo,
        is_authenticated: bool,
        membership: Option<MembershipStatus>,
        bypass_reason: Option<&'static str>,
    ) -> AccessResult {
        let is_member = membership.as_ref().map(|m| m.is_active).unwrap_or(false);
        AccessResult {
            content,
            has_access: true,
            is_truncated: false,
            is_authenticated,
            is_member,
            membership,
            has_viewed_this_content: true,
            view_count: 0,
            max_views: UNLIMITED,
            remaining_views: UNLIMITED,
            reset_date: reset.reset_date,
            days_until_reset: reset.days_until_reset,
            timezone: self.config.timezone.clone(),
            should_set_anon_cookie: false,
            anon_id: None,
            bypass_reason,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn metered_result(
        &self,
        mut content: ContentItem,
        has_access: bool,
        is_authenticated: bool,
        membership: Option<MembershipStatus>,
        has_viewed: bool,
        view_count: i64,
        quota: i64,
        reset: ResetInfo,
        anon: Option<AnonIdentity>,
    ) -> AccessResult {
        let is_truncated = !has_access;
        if is_truncated {
            content.body = truncate::truncate_markdown(&content.body, self.config.teaser_max_chars);
        }

        // Cookie rules: unauthenticated, metering active, and no id presented.
        let should_set_anon_cookie = !is_authenticated
            && anon.as_ref().map(|a| a.is_new).unwrap_or(false);

        AccessResult {
            content,
            has_access,
            is_truncated,
            is_authenticated,
            is_member: false,
            membership,
            has_viewed_this_content: has_viewed,
            view_count,
            max_views: quota,
            remaining_views: (quota - view_count).max(0),
            reset_date: reset.reset_date,
            days_until_reset: reset.days_until_reset,
            timezone: self.config.timezone.clone(),
            should_set_anon_cookie,
            anon_id: anon.map(|a| a.anon_id),
            bypass_reason: None,
        }
    }

    /// Authenticated ledger write used by the explicit track-view endpoint.
    pub async fn track_view(
        &self,
        user_id: Uuid,
        content_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TrackViewStats, AppError> {
        let month_start = clock::business_month_start(now, self.tz);
        self.views.record_view(user_id, content_id, month_start).await?;

        let view_count = self.views.count_monthly_views(user_id, month_start).await? as i64;
        let quota = self.config.auth_user_max_views as i64;

        Ok(TrackViewStats {
            view_count,
            max_views: quota,
            remaining_views: (quota - view_count).max(0),
        })
    }

    /// Monthly stats plus CMS-enriched recent views for the reading-history
    /// display. Missing content is tolerated with a placeholder title.
    pub async fn reading_stats(
        &self,
        user_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<ReadingStats, AppError> {
        let month_start = clock::business_month_start(now, self.tz);
        let reset = self.reset_info(now);

        let view_count = self.views.count_monthly_views(user_id, month_start).await? as i64;
        let records = self.views.recent_views(user_id, month_start, limit).await?;

        let lookups = records.iter().map(|record| self.content.fetch(&record.content_id));
        let fetched = futures::future::join_all(lookups).await;

        let recent_views = records
            .iter()
            .zip(fetched)
            .map(|(record, content)| {
                let content = content.unwrap_or_else(|e| {
                    warn!(content_id = %record.content_id, error = %e, "recent view enrichment failed");
                    None
                });
                match content {
                    Some(item) => RecentViewItem {
                        content_id: record.content_id.clone(),
                        viewed_at: record.last_viewed_at,
                        title: item.title,
                        guest: item.guest,
                        source: item.source,
                    },
                    None => RecentViewItem {
                        content_id: record.content_id.clone(),
                        viewed_at: record.last_viewed_at,
                        title: "内容已下架".to_string(),
                        guest: String::new(),
                        source: String::new(),
                    },
                }
            })
            .collect();

        let quota = self.config.auth_user_max_views as i64;
        Ok(ReadingStats {
            view_count,
            max_views: quota,
            remaining_views: (quota - view_count).max(0),
            reset_date: reset.reset_date,
            days_until_reset: reset.days_until_reset,
            timezone: self.config.timezone.clone(),
            recent_views,
        })
    }
}
