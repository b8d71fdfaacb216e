//! Consultant availability slots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

/// Slot lifecycle
///
/// `Open -> Held` on booking, `Held -> Booked` on payment capture,
/// `Held -> Open` when the hold expires or the order is cancelled before payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Open,
    Held,
    Booked,
    Cancelled,
}

text_enum!(SlotStatus {
    Open => "open",
    Held => "held",
    Booked => "booked",
    Cancelled => "cancelled",
});

/// Bookable time window published by a consultant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub consultant_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SlotStatus,
    pub held_until: Option<DateTime<Utc>>,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    pub fn duration_minutes(&self) -> i64 {
        pulse_common::time::minutes_between(self.starts_at, self.ends_at)
    }

    /// Half-open interval overlap test
    pub fn overlaps(&self, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> bool {
        self.starts_at < ends_at && starts_at < self.ends_at
    }
}
