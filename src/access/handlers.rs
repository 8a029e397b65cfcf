use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::access::identity::{anon_cookie, resolve_anon_id};
use crate::access::ResolveRequest;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AccessBody {
    pub content_id: String,
    /// Client-side anonymous counters, ignored for authenticated callers.
    #[serde(default)]
    pub anon_view_count: u32,
    #[serde(default)]
    pub anon_has_viewed: bool,
}

#[derive(Debug, Deserialize)]
pub struct TrackViewBody {
    pub content_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReadingStatsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    10
}

/// POST /api/content/access
pub async fn resolve_access(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<AccessBody>,
) -> Result<HttpResponse, AppError> {
    if body.content_id.trim().is_empty() {
        return Err(AppError::InvalidInput("content_id 不能为空".into()));
    }

    let user = state.auth.current_user(&req);
    let anon = match user {
        Some(_) => None,
        None => Some(resolve_anon_id(&req)),
    };

    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let resolve = ResolveRequest {
        content_id: body.content_id.clone(),
        user_id: user.map(|u| u.id),
        anon,
        user_agent,
        anon_view_count: body.anon_view_count,
        anon_has_viewed: body.anon_has_viewed,
    };

    let result = state.access.resolve(&resolve, Utc::now()).await?;
    debug!(
        content_id = %body.content_id,
        has_access = result.has_access,
        bypass = ?result.bypass_reason,
        "access resolved"
    );

    let mut response = HttpResponse::Ok();
    if result.should_set_anon_cookie {
        if let Some(anon_id) = &result.anon_id {
            response.cookie(anon_cookie(anon_id, state.config.is_production()));
        }
    }

    Ok(response.json(json!({
        "success": true,
        "access": result,
    })))
}

/// POST /api/content/track-view
pub async fn track_view(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TrackViewBody>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;

    if body.content_id.trim().is_empty() {
        return Err(AppError::InvalidInput("content_id 不能为空".into()));
    }

    let stats = state
        .access
        .track_view(user.id, &body.content_id, Utc::now())
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "stats": stats,
    })))
}

/// GET /api/user/reading-stats
pub async fn reading_stats(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ReadingStatsQuery>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;
    let limit = query.limit.clamp(1, 50);

    let stats = state.access.reading_stats(user.id, limit, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "stats": stats,
    })))
}
