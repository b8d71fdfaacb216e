//! Customer choices (service type, consultant and slot picked before booking)

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::auth::require_role;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, CustomerChoice, Role};
use crate::services::booking;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateChoiceRequest {
    pub service_type_id: Uuid,
    pub consultant_id: Uuid,
    pub slot_id: Uuid,
}

/// POST /api/choices
pub async fn create_choice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateChoiceRequest>,
) -> ApiResult<impl IntoResponse> {
    require_role(&auth, Role::Customer)?;

    let choice = booking::create_choice(
        &state.db,
        auth.id(),
        req.service_type_id,
        req.consultant_id,
        req.slot_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(choice)))
}

/// GET /api/choices/:id
pub async fn get_choice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CustomerChoice>> {
    let choice = db::choices::load_choice(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Choice {} not found", id)))?;

    if choice.customer_id != auth.id() && !auth.is_admin() {
        return Err(ApiError::Forbidden("Choice belongs to another customer".to_string()));
    }
    Ok(Json(choice))
}

pub fn choice_routes() -> Router<AppState> {
    Router::new()
        .route("/api/choices", post(create_choice))
        .route("/api/choices/:id", get(get_choice))
}
