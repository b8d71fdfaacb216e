//! Consultant payouts

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;

use super::auth::require_admin;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, Payout, Role};
use crate::services::payouts;
use crate::AppState;

/// GET /api/payouts
///
/// Consultants see their own payouts, admins see all.
pub async fn list_payouts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Payout>>> {
    let consultant = match auth.role() {
        Role::Admin => None,
        Role::Consultant => Some(auth.id()),
        Role::Customer => {
            return Err(ApiError::Forbidden("Customers have no payouts".to_string()));
        }
    };
    Ok(Json(db::payouts::list_payouts(&state.db, consultant).await?))
}

/// POST /api/admin/payouts/:id/process
pub async fn process_payout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payout>> {
    require_admin(&auth)?;
    Ok(Json(payouts::process_payout(&state, id).await?))
}

pub fn payout_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payouts", get(list_payouts))
        .route("/api/admin/payouts/:id/process", post(process_payout))
}
