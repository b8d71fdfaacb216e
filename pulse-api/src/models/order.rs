//! Orders (support tickets), customer choices and the status workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

/// Ticket status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Open,
    InProgress,
    Resolved,
    Closed,
    Cancelled,
}

text_enum!(OrderStatus {
    PendingPayment => "pending_payment",
    Open => "open",
    InProgress => "in_progress",
    Resolved => "resolved",
    Closed => "closed",
    Cancelled => "cancelled",
});

impl OrderStatus {
    /// No further transitions or messages
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

text_enum!(Priority {
    Low => "low",
    Normal => "normal",
    High => "high",
    Critical => "critical",
});

/// How the caller relates to an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    Customer,
    Consultant,
    Admin,
}

/// Parties allowed to move an order from `from` to `to`
///
/// `None` when the transition does not exist at all.
pub fn transition_actors(from: OrderStatus, to: OrderStatus) -> Option<&'static [Participant]> {
    use OrderStatus::*;
    use Participant::*;

    match (from, to) {
        (PendingPayment, Cancelled) => Some(&[Customer, Admin]),
        (Open, InProgress) => Some(&[Consultant]),
        (Open, Cancelled) => Some(&[Customer, Admin]),
        (InProgress, Resolved) => Some(&[Consultant]),
        (Resolved, InProgress) => Some(&[Customer]),
        (Resolved, Closed) => Some(&[Customer, Admin]),
        _ => None,
    }
}

/// Customer's support request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub consultant_id: Uuid,
    pub slot_id: Uuid,
    pub service_type_id: Uuid,
    pub module_code: Option<String>,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: OrderStatus,
    pub amount_paise: i64,
    pub platform_fee_paise: i64,
    pub gateway_fee_paise: i64,
    pub consultant_payout_paise: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Caller's relation to this order, if any
    pub fn participant(&self, user_id: Uuid, is_admin: bool) -> Option<Participant> {
        if user_id == self.customer_id {
            Some(Participant::Customer)
        } else if user_id == self.consultant_id {
            Some(Participant::Consultant)
        } else if is_admin {
            Some(Participant::Admin)
        } else {
            None
        }
    }

    /// The other party of a conversation
    pub fn counterpart(&self, user_id: Uuid) -> Uuid {
        if user_id == self.customer_id {
            self.consultant_id
        } else {
            self.customer_id
        }
    }
}

/// Entry of `order_status_history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: i64,
    pub order_id: Uuid,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub changed_by: Option<Uuid>,
    pub note: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceStatus {
    Pending,
    Converted,
    Abandoned,
}

text_enum!(ChoiceStatus {
    Pending => "pending",
    Converted => "converted",
    Abandoned => "abandoned",
});

/// Service type, consultant and slot picked before booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerChoice {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub service_type_id: Uuid,
    pub consultant_id: Uuid,
    pub slot_id: Uuid,
    pub status: ChoiceStatus,
    pub created_at: DateTime<Utc>,
}
