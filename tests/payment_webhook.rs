//! Order creation and webhook settlement against in-memory stores:
//! signature rejection, idempotent double delivery, membership stacking,
//! and the discounted coupon order path.

mod support;

use actix_web::http::StatusCode;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use jiangzao_server::bargain::{BargainService, Evaluation, SubmitRequest};
use jiangzao_server::config::Settings;
use jiangzao_server::membership::{MembershipStore, MembershipTier};
use jiangzao_server::payment::service::{CallbackAck, CreateOrderRequest, CreatedOrder};
use jiangzao_server::payment::sign::generate_sign;
use jiangzao_server::payment::{CallbackParams, OrderStatus, PaymentService, ZpayGateway, TRADE_SUCCESS};

use support::{InMemoryBargainStore, InMemoryMembershipStore, InMemoryOrderStore, ScriptedScorer};

const MERCHANT_KEY: &str = "test_merchant_key";

struct Harness {
    payment: PaymentService,
    orders: Arc<InMemoryOrderStore>,
    memberships: Arc<InMemoryMembershipStore>,
    bargains: Arc<InMemoryBargainStore>,
    bargain_service: Arc<BargainService>,
}

fn harness_with_scorer(scorer: ScriptedScorer) -> Harness {
    let settings = Settings::new_for_test().unwrap();
    let orders = Arc::new(InMemoryOrderStore::new());
    let memberships = Arc::new(InMemoryMembershipStore::new());
    let bargains = Arc::new(InMemoryBargainStore::new());

    let bargain_service = Arc::new(BargainService::new(
        bargains.clone(),
        Arc::new(scorer),
        settings.bargain.clone(),
    ));
    let payment = PaymentService::new(
        orders.clone(),
        memberships.clone(),
        bargain_service.clone(),
        ZpayGateway::new(settings.zpay.clone()),
    );

    Harness {
        payment,
        orders,
        memberships,
        bargains,
        bargain_service,
    }
}

fn harness() -> Harness {
    harness_with_scorer(ScriptedScorer::failing())
}

fn create_request(user_id: Uuid, tier: MembershipTier) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        user_email: Some("buyer@example.com".to_string()),
        product_type: tier,
        payment_method: "wxpay".to_string(),
        coupon_code: None,
        client_ip: Some("1.2.3.4".to_string()),
    }
}

/// Callback signed the way the gateway signs: over the string parameters.
fn signed_callback(order: &CreatedOrder, money: &str) -> CallbackParams {
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("pid".into(), "1000".into());
    params.insert("trade_no".into(), "ZP20241104001".into());
    params.insert("out_trade_no".into(), order.order_id.clone());
    params.insert("type".into(), "wxpay".into());
    params.insert("name".into(), order.product_name.clone());
    params.insert("money".into(), money.to_string());
    params.insert("trade_status".into(), TRADE_SUCCESS.into());
    let sign = generate_sign(&params, MERCHANT_KEY);

    CallbackParams {
        pid: "1000".into(),
        trade_no: "ZP20241104001".into(),
        out_trade_no: order.order_id.clone(),
        payment_type: "wxpay".into(),
        name: order.product_name.clone(),
        money: money.to_string(),
        trade_status: TRADE_SUCCESS.into(),
        sign,
        sign_type: Some("MD5".into()),
    }
}

#[tokio::test]
async fn successful_payment_activates_membership_and_completes_order() {
    let h = harness();
    let user = Uuid::new_v4();
    let before = Utc::now();

    let created = h
        .payment
        .create_order(create_request(user, MembershipTier::Monthly))
        .await
        .unwrap();
    assert!((created.amount - 9.9).abs() < 1e-9);
    assert!(created.payment_url.contains("money=9.90"));
    assert_eq!(h.orders.status_of(&created.order_id), Some(OrderStatus::Pending));

    let ack = h.payment.handle_callback(signed_callback(&created, "9.90")).await;
    assert_eq!(ack, CallbackAck::Success);
    assert_eq!(h.orders.status_of(&created.order_id), Some(OrderStatus::Completed));

    let expiry = h.memberships.expiry_of(user).unwrap().unwrap();
    let expected = before + Duration::days(30);
    assert!((expiry - expected).num_seconds().abs() < 5);
}

#[tokio::test]
async fn double_delivery_credits_once() {
    let h = harness();
    let user = Uuid::new_v4();

    let created = h
        .payment
        .create_order(create_request(user, MembershipTier::Monthly))
        .await
        .unwrap();
    let callback = signed_callback(&created, "9.90");

    assert_eq!(h.payment.handle_callback(callback.clone()).await, CallbackAck::Success);
    let expiry_after_first = h.memberships.expiry_of(user).unwrap();

    // Replay: acked success, but no second 30-day grant.
    assert_eq!(h.payment.handle_callback(callback).await, CallbackAck::Success);
    assert_eq!(h.memberships.expiry_of(user).unwrap(), expiry_after_first);
    assert_eq!(h.orders.status_of(&created.order_id), Some(OrderStatus::Completed));
}

#[tokio::test]
async fn renewal_stacks_on_unexpired_membership() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let current_expiry = now + Duration::days(10);

    h.memberships
        .upsert(user, MembershipTier::Monthly, Some(current_expiry))
        .await
        .unwrap();

    let created = h
        .payment
        .create_order(create_request(user, MembershipTier::Yearly))
        .await
        .unwrap();
    h.payment.handle_callback(signed_callback(&created, "99.00")).await;

    // 365 days on top of the remaining 10, tier switched to yearly.
    let expiry = h.memberships.expiry_of(user).unwrap().unwrap();
    let expected = current_expiry + Duration::days(365);
    assert!((expiry - expected).num_seconds().abs() < 5);
}

#[tokio::test]
async fn bad_signature_is_rejected_and_order_stays_pending() {
    let h = harness();
    let created = h
        .payment
        .create_order(create_request(Uuid::new_v4(), MembershipTier::Monthly))
        .await
        .unwrap();

    let mut callback = signed_callback(&created, "9.90");
    callback.sign = "0123456789abcdef0123456789abcdef".into();

    let ack = h.payment.handle_callback(callback).await;
    assert_eq!(ack, CallbackAck::Fail(StatusCode::FORBIDDEN));
    assert_eq!(h.orders.status_of(&created.order_id), Some(OrderStatus::Pending));
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let h = harness();
    let created = h
        .payment
        .create_order(create_request(Uuid::new_v4(), MembershipTier::Monthly))
        .await
        .unwrap();

    // Signed correctly, but over a tampered amount.
    let ack = h.payment.handle_callback(signed_callback(&created, "0.01")).await;
    assert_eq!(ack, CallbackAck::Fail(StatusCode::BAD_REQUEST));
    assert_eq!(h.orders.status_of(&created.order_id), Some(OrderStatus::Pending));
}

#[tokio::test]
async fn sub_epsilon_amount_difference_is_tolerated() {
    let h = harness();
    let user = Uuid::new_v4();
    let created = h
        .payment
        .create_order(create_request(user, MembershipTier::Monthly))
        .await
        .unwrap();

    let ack = h.payment.handle_callback(signed_callback(&created, "9.9")).await;
    assert_eq!(ack, CallbackAck::Success);
}

#[tokio::test]
async fn unknown_order_fails_with_not_found() {
    let h = harness();
    let phantom = CreatedOrder {
        order_id: "JZ_20240101_0_XXXXXX".into(),
        payment_url: String::new(),
        amount: 9.9,
        original_amount: None,
        discount_amount: None,
        product_name: "月会员".into(),
    };

    let ack = h.payment.handle_callback(signed_callback(&phantom, "9.90")).await;
    assert_eq!(ack, CallbackAck::Fail(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn non_success_status_is_acked_without_side_effects() {
    let h = harness();
    let user = Uuid::new_v4();
    let created = h
        .payment
        .create_order(create_request(user, MembershipTier::Monthly))
        .await
        .unwrap();

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    params.insert("pid".into(), "1000".into());
    params.insert("trade_no".into(), "ZP1".into());
    params.insert("out_trade_no".into(), created.order_id.clone());
    params.insert("type".into(), "wxpay".into());
    params.insert("name".into(), "月会员".into());
    params.insert("money".into(), "9.90".into());
    params.insert("trade_status".into(), "TRADE_PENDING".into());
    let sign = generate_sign(&params, MERCHANT_KEY);

    let callback = CallbackParams {
        pid: "1000".into(),
        trade_no: "ZP1".into(),
        out_trade_no: created.order_id.clone(),
        payment_type: "wxpay".into(),
        name: "月会员".into(),
        money: "9.90".into(),
        trade_status: "TRADE_PENDING".into(),
        sign,
        sign_type: None,
    };

    assert_eq!(h.payment.handle_callback(callback).await, CallbackAck::Success);
    assert_eq!(h.orders.status_of(&created.order_id), Some(OrderStatus::Pending));
    assert!(h.memberships.expiry_of(user).is_none());
}

#[tokio::test]
async fn incomplete_callback_is_a_bad_request() {
    let h = harness();
    let created = h
        .payment
        .create_order(create_request(Uuid::new_v4(), MembershipTier::Monthly))
        .await
        .unwrap();

    let mut callback = signed_callback(&created, "9.90");
    callback.trade_no = String::new();
    assert_eq!(
        h.payment.handle_callback(callback).await,
        CallbackAck::Fail(StatusCode::BAD_REQUEST)
    );
}

#[tokio::test]
async fn callback_params_parse_from_query_string() {
    // The gateway notifies via GET with urlencoded parameters.
    let query = "pid=1000&trade_no=ZP1&out_trade_no=JZ_20240101_0_ABCDEF&type=wxpay\
                 &name=%E6%9C%88%E4%BC%9A%E5%91%98&money=9.90&trade_status=TRADE_SUCCESS\
                 &sign=abc123&sign_type=MD5";
    let params: CallbackParams = serde_urlencoded::from_str(query).unwrap();
    assert_eq!(params.out_trade_no, "JZ_20240101_0_ABCDEF");
    assert_eq!(params.name, "月会员");
    assert_eq!(params.payment_type, "wxpay");
    assert!(params.is_complete());
}

#[tokio::test]
async fn coupon_order_charges_locked_in_price_and_redeems_coupon() {
    let h = harness_with_scorer(ScriptedScorer::verdict(Evaluation {
        score: 92,
        discount_percent: 80,
        final_price: 1.98,
        message: "理由很打动人！".into(),
    }));
    let user = Uuid::new_v4();

    let outcome = h
        .bargain_service
        .submit(SubmitRequest {
            user_id: user,
            user_email: None,
            reason: "我是一名学生，最近的生活费都用来买专业书了，真的很想继续听下去。".repeat(2),
            client_ip: "1.2.3.4".into(),
            user_agent: "test".into(),
        })
        .await
        .unwrap();
    assert!((outcome.final_price - 1.98).abs() < 1e-9);

    let mut request = create_request(user, MembershipTier::Monthly);
    request.coupon_code = Some(outcome.coupon_code.clone());
    let created = h.payment.create_order(request).await.unwrap();

    assert!((created.amount - 1.98).abs() < 1e-9);
    assert_eq!(created.original_amount, Some(9.9));
    assert_eq!(created.discount_amount, Some(7.92));
    assert!(created.payment_url.contains("money=1.98"));

    let ack = h.payment.handle_callback(signed_callback(&created, "1.98")).await;
    assert_eq!(ack, CallbackAck::Success);
    assert_eq!(h.orders.status_of(&created.order_id), Some(OrderStatus::Completed));
    assert_eq!(h.bargains.coupon_used(&outcome.coupon_code), Some(true));
}

#[tokio::test]
async fn coupon_not_valid_for_yearly_order() {
    let h = harness_with_scorer(ScriptedScorer::verdict(Evaluation {
        score: 70,
        discount_percent: 30,
        final_price: 6.93,
        message: "可以".into(),
    }));
    let user = Uuid::new_v4();

    let outcome = h
        .bargain_service
        .submit(SubmitRequest {
            user_id: user,
            user_email: None,
            reason: "这".repeat(50),
            client_ip: "1.2.3.4".into(),
            user_agent: "test".into(),
        })
        .await
        .unwrap();

    let mut request = create_request(user, MembershipTier::Yearly);
    request.coupon_code = Some(outcome.coupon_code);
    let err = h.payment.create_order(request).await.unwrap_err();
    assert!(matches!(err, jiangzao_server::error::AppError::InvalidInput(msg) if msg.contains("月会员")));
}

#[tokio::test]
async fn unsupported_payment_method_rejected() {
    let h = harness();
    let mut request = create_request(Uuid::new_v4(), MembershipTier::Monthly);
    request.payment_method = "alipay".into();
    let err = h.payment.create_order(request).await.unwrap_err();
    assert!(matches!(err, jiangzao_server::error::AppError::InvalidInput(_)));
}

#[tokio::test]
async fn order_ownership_enforced_on_status_check() {
    let h = harness();
    let owner = Uuid::new_v4();
    let created = h
        .payment
        .create_order(create_request(owner, MembershipTier::Monthly))
        .await
        .unwrap();

    let fetched = h.payment.order_for_user(&created.order_id, owner).await.unwrap();
    assert_eq!(fetched.order_id, created.order_id);

    let err = h
        .payment
        .order_for_user(&created.order_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, jiangzao_server::error::AppError::Forbidden(_)));
}
