//! Consultant payout processing

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Payout, PayoutStatus};
use crate::AppState;

/// Send a pending (or previously failed) payout through the gateway
///
/// The payout is claimed (`Processing`) before the gateway call, so
/// overlapping requests cannot pay the same payout twice.
pub async fn process_payout(state: &AppState, payout_id: Uuid) -> ApiResult<Payout> {
    let payout = db::payouts::load_payout(&state.db, payout_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payout {} not found", payout_id)))?;

    if !matches!(payout.status, PayoutStatus::Pending | PayoutStatus::Failed) {
        return Err(ApiError::Conflict(format!(
            "Payout {} is {}",
            payout_id, payout.status
        )));
    }

    let fund_account_id = db::consultants::load_profile(&state.db, payout.consultant_id)
        .await?
        .and_then(|profile| profile.payout_account_id)
        .filter(|account| !account.trim().is_empty())
        .ok_or_else(|| {
            ApiError::Unprocessable(format!(
                "Consultant {} has no payout account configured",
                payout.consultant_id
            ))
        })?;

    if !db::payouts::claim_payout(&state.db, payout.id, Utc::now()).await? {
        return Err(ApiError::Conflict(format!(
            "Payout {} is already being processed",
            payout_id
        )));
    }

    let result = state
        .gateway
        .create_payout(&fund_account_id, payout.amount_paise, &payout.id.to_string())
        .await;

    let now = Utc::now();
    match result {
        Ok(gateway_payout) => {
            db::payouts::record_outcome(
                &state.db,
                payout.id,
                PayoutStatus::Processed,
                Some(&gateway_payout.id),
                None,
                now,
            )
            .await?;
            info!(payout_id = %payout.id, gateway_payout_id = %gateway_payout.id, "Payout processed");
        }
        Err(e) => {
            let reason = e.to_string();
            db::payouts::record_outcome(
                &state.db,
                payout.id,
                PayoutStatus::Failed,
                None,
                Some(&reason),
                now,
            )
            .await?;
            warn!(payout_id = %payout.id, error = %reason, "Payout failed");
            return Err(e.into());
        }
    }

    db::payouts::load_payout(&state.db, payout.id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Payout {} vanished", payout.id)))
}
