use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::auth::client_ip;
use crate::bargain::SubmitRequest;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub reason: String,
}

/// POST /api/bargain/submit
pub async fn submit(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<SubmitBody>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;

    if body.reason.trim().is_empty() {
        return Err(AppError::InvalidInput("请输入砍价理由".into()));
    }

    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let outcome = state
        .bargain
        .submit(SubmitRequest {
            user_id: user.id,
            user_email: user.email,
            reason: body.reason.clone(),
            client_ip: client_ip(&req),
            user_agent,
        })
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "result": outcome,
    })))
}

/// GET /api/bargain/status
pub async fn status(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;

    let eligibility = state
        .bargain
        .check_eligibility(user.id, user.email.as_deref())
        .await?;

    let mut body = json!({
        "success": true,
        "can_bargain": eligibility.can_bargain,
    });
    if let Some(existing) = eligibility.existing {
        body["existing_attempt"] = serde_json::to_value(&existing)?;
    }

    Ok(HttpResponse::Ok().json(body))
}
