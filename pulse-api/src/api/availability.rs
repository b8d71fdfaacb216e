//! Consultant availability management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::auth::require_role;
use crate::db;
use crate::error::ApiResult;
use crate::models::{AuthUser, Role, Slot};
use crate::services::availability;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSlotRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// POST /api/availability
pub async fn create_slot(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateSlotRequest>,
) -> ApiResult<impl IntoResponse> {
    require_role(&auth, Role::Consultant)?;

    let slot = availability::publish_slot(
        &state.db,
        &state.config.booking,
        auth.id(),
        req.starts_at,
        req.ends_at,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

/// GET /api/availability - every slot of the calling consultant
pub async fn list_own_slots(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Slot>>> {
    require_role(&auth, Role::Consultant)?;
    Ok(Json(
        db::slots::list_consultant_slots(&state.db, auth.id()).await?,
    ))
}

/// DELETE /api/availability/:id
pub async fn withdraw_slot(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Slot>> {
    require_role(&auth, Role::Consultant)?;
    Ok(Json(
        availability::withdraw_slot(&state.db, auth.id(), id).await?,
    ))
}

pub fn availability_routes() -> Router<AppState> {
    Router::new()
        .route("/api/availability", get(list_own_slots).post(create_slot))
        .route("/api/availability/:id", delete(withdraw_slot))
}
