//! Order creation and webhook settlement.

use actix_web::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bargain::BargainService;
use crate::error::AppError;
use crate::membership::{plan_for, renewal_expiry, MembershipStore, MembershipTier};
use crate::payment::gateway::{generate_order_id, CallbackParams, ZpayGateway, TRADE_SUCCESS};
use crate::payment::store::{NewOrder, Order, OrderStore};
use crate::payment::OrderStatus;

/// Largest callback/order amount difference still treated as equal.
const AMOUNT_EPSILON: f64 = 0.01;

#[derive(Debug, Clone, Serialize)]
pub struct CreatedOrder {
    pub order_id: String,
    pub payment_url: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<f64>,
    pub product_name: String,
}

pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub product_type: MembershipTier,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    pub client_ip: Option<String>,
}

/// What to tell the gateway. The body is always the literal `success` or
/// `fail`; the gateway retries on anything that is not `success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    Success,
    Fail(StatusCode),
}

impl CallbackAck {
    pub fn body(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail(_) => "fail",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Success => StatusCode::OK,
            Self::Fail(status) => *status,
        }
    }
}

pub struct PaymentService {
    orders: Arc<dyn OrderStore>,
    memberships: Arc<dyn MembershipStore>,
    bargain: Arc<BargainService>,
    gateway: ZpayGateway,
}

impl PaymentService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        memberships: Arc<dyn MembershipStore>,
        bargain: Arc<BargainService>,
        gateway: ZpayGateway,
    ) -> Self {
        Self {
            orders,
            memberships,
            bargain,
            gateway,
        }
    }

    /// Create a pending order and the hosted-page payment URL. A coupon, if
    /// given, must validate; its locked-in final price overrides the list
    /// price.
    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<CreatedOrder, AppError> {
        if !req.product_type.is_purchasable() {
            return Err(AppError::InvalidInput("无效的套餐类型".into()));
        }
        if req.payment_method != super::gateway::PAYMENT_METHOD_WXPAY {
            warn!(method = %req.payment_method, "unsupported payment method requested");
            return Err(AppError::InvalidInput(
                "当前仅支持微信支付，如需其他支付方式请联系客服".into(),
            ));
        }

        let plan = plan_for(req.product_type)
            .ok_or_else(|| AppError::InvalidInput("套餐配置不存在".into()))?;

        let mut amount = plan.price;
        let mut original_amount = None;
        let mut discount_amount = None;
        let mut coupon_code = None;

        if let Some(code) = &req.coupon_code {
            let attempt = self
                .bargain
                .validate_coupon(code, req.user_id, req.product_type, Utc::now())
                .await?
                .map_err(|rejection| {
                    warn!(coupon = %code, ?rejection, "coupon rejected at checkout");
                    AppError::InvalidInput(rejection.user_message().to_string())
                })?;

            original_amount = Some(plan.price);
            discount_amount = Some(
                (plan.price * attempt.discount_percent as f64 / 100.0 * 100.0).round() / 100.0,
            );
            // The price the evaluator locked in, not a recomputation.
            amount = attempt.final_price;
            coupon_code = Some(code.clone());
        }

        let order_id = generate_order_id(Utc::now());
        self.orders
            .insert(NewOrder {
                order_id: order_id.clone(),
                user_id: req.user_id,
                user_email: req.user_email,
                product_type: req.product_type,
                product_name: plan.name.to_string(),
                amount,
                original_amount,
                discount_amount,
                coupon_code,
                payment_method: req.payment_method,
                membership_duration_days: plan.duration_days,
                client_ip: req.client_ip,
            })
            .await?;

        let payment_url = match self.gateway.build_payment_url(&order_id, plan.name, amount) {
            Ok(url) => url,
            Err(e) => {
                // Don't leave an unpayable pending order behind.
                error!(order_id = %order_id, error = %e, "payment url build failed, rolling back order");
                if let Err(del) = self.orders.delete(&order_id).await {
                    error!(order_id = %order_id, error = %del, "order rollback failed");
                }
                return Err(e);
            }
        };

        info!(order_id = %order_id, amount, product = %plan.name, "order created");
        Ok(CreatedOrder {
            order_id,
            payment_url,
            amount,
            original_amount,
            discount_amount,
            product_name: plan.name.to_string(),
        })
    }

    /// Settle a gateway notification. Never returns an error: every outcome
    /// maps to an ack the gateway understands, and side-effect failures after
    /// the paid transition are logged and acked `success` so the gateway does
    /// not replay a callback we can no longer apply idempotently.
    pub async fn handle_callback(&self, params: CallbackParams) -> CallbackAck {
        let now = Utc::now();

        if !params.is_complete() {
            error!(?params, "callback missing required fields");
            return CallbackAck::Fail(StatusCode::BAD_REQUEST);
        }

        if !self.gateway.verify_callback(&params) {
            error!(order_id = %params.out_trade_no, "callback signature invalid");
            return CallbackAck::Fail(StatusCode::FORBIDDEN);
        }

        if params.pid != self.gateway.pid() {
            error!(received = %params.pid, "callback merchant id mismatch");
            return CallbackAck::Fail(StatusCode::FORBIDDEN);
        }

        if params.trade_status != TRADE_SUCCESS {
            // Ack non-success notifications so the gateway stops resending.
            info!(status = %params.trade_status, order_id = %params.out_trade_no, "non-success trade status");
            return CallbackAck::Success;
        }

        let order = match self.orders.find_by_order_id(&params.out_trade_no).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                error!(order_id = %params.out_trade_no, "callback for unknown order");
                return CallbackAck::Fail(StatusCode::NOT_FOUND);
            }
            Err(e) => {
                error!(order_id = %params.out_trade_no, error = %e, "order lookup failed");
                return CallbackAck::Fail(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        // Idempotency gate: only a pending order is settled. Replays of an
        // already-processed callback are acked without side effects.
        if order.status != OrderStatus::Pending {
            info!(order_id = %order.order_id, status = %order.status, "order already processed");
            return CallbackAck::Success;
        }

        let callback_amount = match params.parsed_money() {
            Ok(amount) => amount,
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "unparseable callback amount");
                return CallbackAck::Fail(StatusCode::BAD_REQUEST);
            }
        };
        if (callback_amount - order.amount).abs() > AMOUNT_EPSILON {
            error!(
                order_id = %order.order_id,
                callback = callback_amount,
                order = order.amount,
                "callback amount mismatch"
            );
            return CallbackAck::Fail(StatusCode::BAD_REQUEST);
        }

        let callback_data = serde_json::json!({
            "pid": params.pid,
            "trade_no": params.trade_no,
            "out_trade_no": params.out_trade_no,
            "type": params.payment_type,
            "name": params.name,
            "money": params.money,
            "trade_status": params.trade_status,
        });

        match self
            .orders
            .mark_paid(&order.order_id, &params.trade_no, callback_data)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent delivery won the pending→paid race.
                info!(order_id = %order.order_id, "lost paid transition race, acking");
                return CallbackAck::Success;
            }
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "paid transition failed");
                return CallbackAck::Fail(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        // From here on the money has been taken; failures are logged for
        // manual follow-up and the callback is acked.
        if let Err(e) = self.activate_membership(&order, now).await {
            error!(
                order_id = %order.order_id,
                user_id = %order.user_id,
                error = %e,
                "membership activation failed after payment"
            );
            return CallbackAck::Success;
        }

        if let Some(coupon) = &order.coupon_code {
            if let Err(e) = self.bargain.redeem_coupon(coupon).await {
                error!(order_id = %order.order_id, coupon = %coupon, error = %e, "coupon redemption failed");
            }
        }

        if let Err(e) = self.orders.mark_completed(&order.order_id, now).await {
            error!(order_id = %order.order_id, error = %e, "completed transition failed");
        }

        info!(
            order_id = %order.order_id,
            trade_no = %params.trade_no,
            user_id = %order.user_id,
            product = %order.product_type,
            "payment settled"
        );
        CallbackAck::Success
    }

    async fn activate_membership(&self, order: &Order, now: DateTime<Utc>) -> Result<(), AppError> {
        let current = self.memberships.get(order.user_id).await?;
        let expires_at = renewal_expiry(current.as_ref(), order.product_type, now);
        self.memberships
            .upsert(order.user_id, order.product_type, expires_at)
            .await?;
        info!(
            user_id = %order.user_id,
            tier = %order.product_type,
            ?expires_at,
            "membership activated"
        );
        Ok(())
    }

    pub async fn order_for_user(&self, order_id: &str, user_id: Uuid) -> Result<Order, AppError> {
        let order = self
            .orders
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("订单不存在".into()))?;

        if order.user_id != user_id {
            return Err(AppError::Forbidden("无权查看此订单".into()));
        }
        Ok(order)
    }

    pub async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, AppError> {
        self.orders.list_for_user(user_id).await
    }
}
