//! Order lifecycle and the Z-Pay payment integration.
//!
//! Order state machine: `pending → paid → completed`, with `failed` and
//! `refunded` reachable only through manual operations. The pending→paid
//! edge is the only one the webhook takes, guarded by a status-conditioned
//! update so a double-delivered callback credits at most once.

pub mod gateway;
pub mod handlers;
pub mod service;
pub mod sign;
pub mod store;

pub use gateway::{generate_order_id, CallbackParams, ZpayGateway, TRADE_SUCCESS};
pub use service::PaymentService;
pub use store::{NewOrder, Order, OrderStore, PgOrderStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Completed,
    Failed,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Legal transitions. The webhook only ever drives pending→paid→completed;
    /// failed/refunded are operator actions.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid)
                | (Self::Pending, Self::Failed)
                | (Self::Paid, Self::Completed)
                | (Self::Paid, Self::Refunded)
                | (Self::Completed, Self::Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
