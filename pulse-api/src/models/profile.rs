//! Consultant profiles and ratings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public consultant profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultantProfile {
    pub user_id: Uuid,
    pub display_name: String,
    pub headline: String,
    pub bio: String,
    pub hourly_rate_paise: i64,
    /// SAP module codes the consultant covers
    pub modules: Vec<String>,
    pub rating_avg: f64,
    pub rating_count: i64,
    /// Gateway fund account for payouts (hidden from other users)
    #[serde(skip_serializing)]
    pub payout_account_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Customer rating of a completed order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub consultant_id: Uuid,
    pub score: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}
