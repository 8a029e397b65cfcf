//! Membership tiers, plan catalog and entitlement evaluation.

pub mod handlers;
pub mod store;

pub use store::{MembershipStore, PgMembershipStore, UserMembership};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    Free,
    Monthly,
    Yearly,
    Lifetime,
}

impl MembershipTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipTier::Free => "free",
            MembershipTier::Monthly => "monthly",
            MembershipTier::Yearly => "yearly",
            MembershipTier::Lifetime => "lifetime",
        }
    }

    /// Tiers a user can actually buy; `free` is the absence of a purchase.
    pub fn is_purchasable(&self) -> bool {
        !matches!(self, MembershipTier::Free)
    }
}

impl fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MembershipTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(MembershipTier::Free),
            "monthly" => Ok(MembershipTier::Monthly),
            "yearly" => Ok(MembershipTier::Yearly),
            "lifetime" => Ok(MembershipTier::Lifetime),
            other => Err(format!("unknown membership tier: {}", other)),
        }
    }
}

/// Static plan metadata. Never mutated at runtime.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipPlan {
    pub tier: MembershipTier,
    pub name: &'static str,
    pub price: f64,
    /// None means unlimited (lifetime).
    pub duration_days: Option<i64>,
    pub description: &'static str,
    pub features: &'static [&'static str],
    pub recommended: bool,
    pub badge: &'static str,
}

pub const MEMBERSHIP_PLANS: [MembershipPlan; 3] = [
    MembershipPlan {
        tier: MembershipTier::Monthly,
        name: "月会员",
        price: 9.9,
        duration_days: Some(30),
        description: "连续30天无限阅读",
        features: &["无限阅读", "阅读统计", "会员标识"],
        recommended: false,
        badge: "月",
    },
    MembershipPlan {
        tier: MembershipTier::Yearly,
        name: "年会员",
        price: 99.0,
        duration_days: Some(365),
        description: "一年无限阅读，相当于每月¥8.25",
        features: &["无限阅读", "阅读统计", "会员标识", "最优惠价"],
        recommended: true,
        badge: "年",
    },
    MembershipPlan {
        tier: MembershipTier::Lifetime,
        name: "终身会员",
        price: 599.0,
        duration_days: None,
        description: "永久无限阅读，未来新功能优先体验",
        features: &["无限阅读", "阅读统计", "会员标识", "未来新功能", "一次付费永久使用"],
        recommended: false,
        badge: "终身",
    },
];

pub fn plan_for(tier: MembershipTier) -> Option<&'static MembershipPlan> {
    MEMBERSHIP_PLANS.iter().find(|p| p.tier == tier)
}

/// Derived entitlement state for display and access decisions.
#[derive(Debug, Clone, Serialize)]
pub struct MembershipStatus {
    pub tier: MembershipTier,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    /// None means unlimited (lifetime); 0 means expired.
    pub days_remaining: Option<i64>,
    pub plan_name: String,
    pub badge: String,
}

impl MembershipStatus {
    pub fn free() -> Self {
        Self {
            tier: MembershipTier::Free,
            is_active: false,
            expires_at: None,
            days_remaining: None,
            plan_name: "免费用户".to_string(),
            badge: String::new(),
        }
    }
}

/// Evaluate a stored membership record (or its absence) into a status.
pub fn evaluate_status(
    membership: Option<&UserMembership>,
    now: DateTime<Utc>,
) -> MembershipStatus {
    let membership = match membership {
        Some(m) if m.tier != MembershipTier::Free => m,
        _ => return MembershipStatus::free(),
    };

    if membership.tier == MembershipTier::Lifetime {
        let plan = plan_for(MembershipTier::Lifetime).expect("lifetime plan exists");
        return MembershipStatus {
            tier: MembershipTier::Lifetime,
            is_active: true,
            expires_at: None,
            days_remaining: None,
            plan_name: plan.name.to_string(),
            badge: plan.badge.to_string(),
        };
    }

    let plan = plan_for(membership.tier).expect("timed plan exists");

    let expires_at = match membership.expires_at {
        Some(expires_at) => expires_at,
        None => {
            // Data-integrity fault: a timed tier must carry an expiry. Report
            // inactive instead of failing the page.
            error!(
                user_id = %membership.user_id,
                tier = %membership.tier,
                "timed membership tier with null expiry"
            );
            return MembershipStatus {
                tier: membership.tier,
                is_active: false,
                expires_at: None,
                days_remaining: None,
                plan_name: plan.name.to_string(),
                badge: plan.badge.to_string(),
            };
        }
    };

    let is_active = expires_at > now;
    let days_remaining = if is_active {
        let secs = (expires_at - now).num_seconds();
        Some((secs + 86_399) / 86_400) // ceil to whole days
    } else {
        Some(0)
    };

    MembershipStatus {
        tier: membership.tier,
        is_active,
        expires_at: Some(expires_at),
        days_remaining,
        plan_name: plan.name.to_string(),
        badge: plan.badge.to_string(),
    }
}

/// Expiry after granting `tier`, honoring the stacking contract:
/// lifetime never expires (None); a still-valid timed membership is extended from its
/// current expiry; everything else starts from now. Extension is always
/// additive, including across a tier change.
pub fn renewal_expiry(
    current: Option<&UserMembership>,
    tier: MembershipTier,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let plan = plan_for(tier)?;
    let duration_days = plan.duration_days?;

    let base = match current {
        Some(m) if m.tier != MembershipTier::Free => match m.expires_at {
            Some(expires_at) if expires_at > now => expires_at,
            _ => now,
        },
        _ => now,
    };

    Some(base + Duration::days(duration_days))
}
