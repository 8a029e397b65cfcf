use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use tracing::info;

use crate::auth::client_ip;
use crate::error::AppError;
use crate::membership::MembershipTier;
use crate::payment::gateway::CallbackParams;
use crate::payment::service::CreateOrderRequest;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    pub product_type: String,
    pub payment_method: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

/// POST /api/payment/create-order
pub async fn create_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateOrderBody>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;

    let product_type = MembershipTier::from_str(&body.product_type)
        .map_err(|_| AppError::InvalidInput("无效的套餐类型".into()))?;

    let created = state
        .payment
        .create_order(CreateOrderRequest {
            user_id: user.id,
            user_email: user.email,
            product_type,
            payment_method: body.payment_method.clone(),
            coupon_code: body.coupon_code.clone(),
            client_ip: Some(client_ip(&req)),
        })
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "orderId": created.order_id,
        "paymentUrl": created.payment_url,
        "amount": created.amount,
        "originalAmount": created.original_amount,
        "discountAmount": created.discount_amount,
        "productName": created.product_name,
    })))
}

fn ack_response(ack: crate::payment::service::CallbackAck) -> HttpResponse {
    HttpResponse::build(ack.status())
        .content_type("text/plain; charset=utf-8")
        .body(ack.body())
}

/// GET /api/payment/callback — the gateway notifies via GET per its docs.
pub async fn callback_get(
    state: web::Data<AppState>,
    query: web::Query<CallbackParams>,
) -> HttpResponse {
    info!(order_id = %query.out_trade_no, "payment callback (GET)");
    ack_response(state.payment.handle_callback(query.into_inner()).await)
}

/// POST /api/payment/callback — form-encoded variant kept for compatibility.
pub async fn callback_post(
    state: web::Data<AppState>,
    form: web::Form<CallbackParams>,
) -> HttpResponse {
    info!(order_id = %form.out_trade_no, "payment callback (POST)");
    ack_response(state.payment.handle_callback(form.into_inner()).await)
}

/// GET /api/payment/check-status/{order_id}
pub async fn check_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    if order_id.trim().is_empty() {
        return Err(AppError::InvalidInput("订单号不能为空".into()));
    }

    let user = state.auth.require_user(&req)?;
    let order = state.payment.order_for_user(&order_id, user.id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "order": {
            "orderId": order.order_id,
            "status": order.status,
            "productName": order.product_name,
            "productType": order.product_type,
            "amount": order.amount,
            "paymentMethod": order.payment_method,
            "createdAt": order.created_at,
            "paidAt": order.callback_received_at,
            "tradeNo": order.trade_no,
        },
    })))
}

/// GET /api/user/orders
pub async fn list_orders(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user = state.auth.require_user(&req)?;
    let orders = state.payment.orders_for_user(user.id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "orders": orders,
    })))
}
