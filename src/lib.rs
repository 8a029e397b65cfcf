pub mod access;
pub mod auth;
pub mod bargain;
pub mod config;
pub mod content;
pub mod error;
pub mod membership;
pub mod payment;

use actix_web::HttpResponse;
use sqlx::PgPool;
use std::sync::Arc;

use crate::access::{AccessService, PgViewStore, ViewStore};
use crate::auth::AuthService;
use crate::bargain::{ArkScorer, BargainService, PgBargainStore};
use crate::config::Settings;
use crate::content::{BitableClient, ContentSource};
use crate::membership::{MembershipStore, PgMembershipStore};
use crate::payment::{PaymentService, PgOrderStore, ZpayGateway};

pub use crate::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Arc<Settings>,
    pub db_pool: Arc<PgPool>,
    pub auth: AuthService,
    pub memberships: Arc<dyn MembershipStore>,
    pub access: Arc<AccessService>,
    pub bargain: Arc<BargainService>,
    pub payment: Arc<PaymentService>,
}

impl AppState {
    pub fn new(settings: Settings, db_pool: PgPool) -> Result<Self> {
        let config = Arc::new(settings);
        let db_pool = Arc::new(db_pool);

        let auth = AuthService::new(config.auth.jwt_secret.clone());

        let content: Arc<dyn ContentSource> = Arc::new(BitableClient::new(config.cms.clone()));
        let views: Arc<dyn ViewStore> = Arc::new(PgViewStore::new(db_pool.clone()));
        let memberships: Arc<dyn MembershipStore> =
            Arc::new(PgMembershipStore::new(db_pool.clone()));

        let access = Arc::new(AccessService::new(
            content,
            views,
            memberships.clone(),
            config.access.clone(),
        )?);

        let scorer = Arc::new(ArkScorer::new(
            config.ark.clone(),
            config.bargain.base_price,
        )?);
        let bargain = Arc::new(BargainService::new(
            Arc::new(PgBargainStore::new(db_pool.clone())),
            scorer,
            config.bargain.clone(),
        ));

        let payment = Arc::new(PaymentService::new(
            Arc::new(PgOrderStore::new(db_pool.clone())),
            memberships.clone(),
            bargain.clone(),
            ZpayGateway::new(config.zpay.clone()),
        ));

        Ok(Self {
            config,
            db_pool,
            auth,
            memberships,
            access,
            bargain,
            payment,
        })
    }
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "jiangzao-server",
    }))
}
