use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::error::AppError;
use crate::membership::{evaluate_status, MEMBERSHIP_PLANS};
use crate::AppState;

/// GET /api/user/membership
pub async fn get_membership(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;

    let membership = state.memberships.get(user.id).await?;
    let status = evaluate_status(membership.as_ref(), Utc::now());

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "membership": status,
    })))
}

/// GET /api/membership/plans
pub async fn list_plans() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "plans": MEMBERSHIP_PLANS,
    }))
}

/// POST /api/user/membership/cancel
pub async fn cancel_membership(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;

    state.memberships.cancel(user.id).await?;
    info!(user_id = %user.id, "membership cancelled");

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}
