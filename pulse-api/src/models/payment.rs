//! Payments, escrow and consultant payouts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

/// Gateway payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Captured,
    Failed,
    Refunded,
    Expired,
    Cancelled,
}

text_enum!(PaymentStatus {
    Created => "created",
    Captured => "captured",
    Failed => "failed",
    Refunded => "refunded",
    Expired => "expired",
    Cancelled => "cancelled",
});

/// Platform-held funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    None,
    Held,
    /// Cancellation refund in flight
    Refunding,
    Released,
    Refunded,
}

text_enum!(EscrowStatus {
    None => "none",
    Held => "held",
    Refunding => "refunding",
    Released => "released",
    Refunded => "refunded",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: Option<String>,
    pub amount_paise: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub escrow_status: EscrowStatus,
    pub refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    /// Claimed by an admin request; gateway call in flight
    Processing,
    Processed,
    Failed,
}

text_enum!(PayoutStatus {
    Pending => "pending",
    Processing => "processing",
    Processed => "processed",
    Failed => "failed",
});

/// Consultant share released from escrow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub order_id: Uuid,
    pub consultant_id: Uuid,
    pub amount_paise: i64,
    pub status: PayoutStatus,
    pub gateway_payout_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
