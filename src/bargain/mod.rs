//! AI bargain engine: one lifetime discount attempt per user.
//!
//! A user pitches a reason, the model scores it and sets a discount, and the
//! resulting coupon (monthly plan only, 24h validity) is locked into the
//! attempt row. Resubmission returns the recorded attempt instead of a
//! second evaluation.

pub mod handlers;
pub mod prompts;
pub mod rate_limit;
pub mod scorer;
pub mod store;

pub use scorer::{fallback_discount, AiScorer, ArkScorer, Evaluation};
pub use store::{BargainAttempt, BargainStore, NewBargainAttempt, PgBargainStore};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BargainConfig;
use crate::error::AppError;
use crate::membership::MembershipTier;
use rate_limit::RateLimiter;

/// Unambiguous alphabet for coupon suffixes: no O/0, I/1.
const COUPON_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const COUPON_SUFFIX_LEN: usize = 6;

/// `BARGAIN_{unix_seconds}_{XXXXXX}`
pub fn generate_coupon_code(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..COUPON_SUFFIX_LEN)
        .map(|_| COUPON_ALPHABET[rng.gen_range(0..COUPON_ALPHABET.len())] as char)
        .collect();
    format!("BARGAIN_{}_{}", now.timestamp(), suffix)
}

#[derive(Debug, Clone, Serialize)]
pub struct BargainOutcome {
    pub score: i32,
    pub discount_percent: i32,
    pub final_price: f64,
    pub message: String,
    pub coupon_code: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&BargainAttempt> for BargainOutcome {
    fn from(attempt: &BargainAttempt) -> Self {
        Self {
            score: attempt.ai_score,
            discount_percent: attempt.discount_percent,
            final_price: attempt.final_price,
            message: attempt.ai_message.clone(),
            coupon_code: attempt.coupon_code.clone(),
            expires_at: attempt.coupon_expires_at,
        }
    }
}

#[derive(Debug)]
pub struct Eligibility {
    pub can_bargain: bool,
    pub existing: Option<BargainAttempt>,
}

/// Why a coupon was rejected; checks run in this order and stop at the
/// first failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    NotFound,
    WrongOwner,
    Expired,
    AlreadyUsed,
    WrongProduct,
}

impl CouponRejection {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound => "优惠券不存在",
            Self::WrongOwner => "优惠券不属于当前用户",
            Self::Expired => "优惠券已过期",
            Self::AlreadyUsed => "优惠券已使用",
            Self::WrongProduct => "优惠券仅适用于月会员",
        }
    }
}

pub struct SubmitRequest {
    pub user_id: Uuid,
    pub user_email: Option<String>,
    pub reason: String,
    pub client_ip: String,
    pub user_agent: String,
}

pub struct BargainService {
    store: Arc<dyn BargainStore>,
    scorer: Arc<dyn AiScorer>,
    config: BargainConfig,
    rate_limiter: RateLimiter,
}

impl BargainService {
    pub fn new(
        store: Arc<dyn BargainStore>,
        scorer: Arc<dyn AiScorer>,
        config: BargainConfig,
    ) -> Self {
        let rate_limiter = RateLimiter::new(StdDuration::from_secs(config.rate_limit_window_secs));
        Self {
            store,
            scorer,
            config,
            rate_limiter,
        }
    }

    /// Whether the user may bargain, plus their recorded attempt if any.
    /// QA accounts are always eligible regardless of history.
    pub async fn check_eligibility(
        &self,
        user_id: Uuid,
        user_email: Option<&str>,
    ) -> Result<Eligibility, AppError> {
        if !self.config.enabled {
            return Ok(Eligibility {
                can_bargain: false,
                existing: None,
            });
        }

        if self.config.is_test_email(user_email) {
            return Ok(Eligibility {
                can_bargain: true,
                existing: None,
            });
        }

        let existing = self.store.find_by_user(user_id).await?;
        Ok(Eligibility {
            can_bargain: existing.is_none(),
            existing,
        })
    }

    /// Evaluate a bargain reason and mint the coupon. Idempotent for users
    /// who already bargained: their recorded outcome comes back unchanged.
    pub async fn submit(&self, req: SubmitRequest) -> Result<BargainOutcome, AppError> {
        // Char count, not bytes: the band is measured in characters and the
        // reasons are mostly CJK.
        let reason_chars = req.reason.chars().count();
        if reason_chars < self.config.min_reason_length {
            return Err(AppError::InvalidInput(format!(
                "理由过短，至少需要 {} 字",
                self.config.min_reason_length
            )));
        }
        if reason_chars > self.config.max_reason_length {
            return Err(AppError::InvalidInput(format!(
                "理由过长，最多 {} 字",
                self.config.max_reason_length
            )));
        }

        let eligibility = self
            .check_eligibility(req.user_id, req.user_email.as_deref())
            .await?;

        if !eligibility.can_bargain {
            return match eligibility.existing {
                Some(existing) => {
                    info!(user_id = %req.user_id, "returning recorded bargain outcome");
                    Ok(BargainOutcome::from(&existing))
                }
                None => Err(AppError::Forbidden("砍价活动暂未开放".into())),
            };
        }

        let is_test_email = self.config.is_test_email(req.user_email.as_deref());
        if !is_test_email {
            let key = format!("bargain:{}:{}", req.user_id, req.client_ip);
            if !self.rate_limiter.check(&key).await {
                warn!(user_id = %req.user_id, ip = %req.client_ip, "bargain rate limit hit");
                return Err(AppError::RateLimited);
            }
        }

        let evaluation = match self.scorer.evaluate(&req.reason).await {
            Ok(eval) => eval,
            Err(e) => {
                warn!(error = %e, "ai evaluation failed, using fallback discount");
                fallback_discount(self.config.base_price)
            }
        };

        if is_test_email {
            info!(user_id = %req.user_id, "test account, clearing previous attempt");
            self.store.delete_for_user(req.user_id).await?;
        }

        let now = Utc::now();
        let coupon_code = generate_coupon_code(now);
        let coupon_expires_at = now + Duration::hours(self.config.coupon_expires_hours);

        let attempt = self
            .store
            .insert(NewBargainAttempt {
                user_id: req.user_id,
                user_email: req.user_email,
                reason: req.reason,
                ai_score: evaluation.score,
                ai_message: evaluation.message,
                discount_percent: evaluation.discount_percent,
                original_price: self.config.base_price,
                final_price: evaluation.final_price,
                coupon_code,
                coupon_expires_at,
                client_ip: Some(req.client_ip),
                user_agent: Some(req.user_agent),
            })
            .await
            .map_err(|e| match e {
                // Concurrent double-submit loses the insert race.
                AppError::DatabaseError(crate::error::DatabaseError::Duplicate) => {
                    AppError::Conflict("你已经砍价过了，每个用户只能砍价一次".into())
                }
                other => other,
            })?;

        info!(
            user_id = %attempt.user_id,
            coupon = %attempt.coupon_code,
            score = attempt.ai_score,
            "bargain attempt saved"
        );
        Ok(BargainOutcome::from(&attempt))
    }

    /// Validate a coupon for checkout. Checks run in order: existence,
    /// ownership, expiry, prior use, product match (monthly only).
    pub async fn validate_coupon(
        &self,
        coupon_code: &str,
        user_id: Uuid,
        tier: MembershipTier,
        now: DateTime<Utc>,
    ) -> Result<Result<BargainAttempt, CouponRejection>, AppError> {
        let attempt = match self.store.find_by_coupon(coupon_code).await? {
            Some(attempt) => attempt,
            None => return Ok(Err(CouponRejection::NotFound)),
        };

        if attempt.user_id != user_id {
            warn!(coupon = %coupon_code, owner = %attempt.user_id, caller = %user_id, "coupon owner mismatch");
            return Ok(Err(CouponRejection::WrongOwner));
        }
        if attempt.coupon_expires_at < now {
            return Ok(Err(CouponRejection::Expired));
        }
        if attempt.coupon_used {
            return Ok(Err(CouponRejection::AlreadyUsed));
        }
        if tier != MembershipTier::Monthly {
            return Ok(Err(CouponRejection::WrongProduct));
        }

        Ok(Ok(attempt))
    }

    pub async fn redeem_coupon(&self, coupon_code: &str) -> Result<(), AppError> {
        self.store.mark_coupon_used(coupon_code).await?;
        info!(coupon = %coupon_code, "coupon redeemed");
        Ok(())
    }
}
