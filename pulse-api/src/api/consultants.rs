//! Consultant directory and own-profile endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::require_role;
use crate::db;
use crate::db::consultants::ProfileUpdate;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, ConsultantProfile, Rating, Role, Slot};
use crate::AppState;

const MAX_HEADLINE_LEN: usize = 200;
const MAX_BIO_LEN: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct ConsultantQuery {
    pub module: Option<String>,
}

/// GET /api/consultants?module=BASIS
pub async fn list_consultants(
    State(state): State<AppState>,
    Query(query): Query<ConsultantQuery>,
) -> ApiResult<Json<Vec<ConsultantProfile>>> {
    let module = query
        .module
        .map(|m| m.trim().to_uppercase())
        .filter(|m| !m.is_empty());
    Ok(Json(
        db::consultants::list_profiles(&state.db, module.as_deref()).await?,
    ))
}

/// GET /api/consultants/:id
pub async fn get_consultant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ConsultantProfile>> {
    db::consultants::load_profile(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Consultant {} not found", id)))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// GET /api/consultants/:id/availability?from=&to=
///
/// Open slots only; `from` defaults to now and never reaches into the past.
pub async fn consultant_availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Json<Vec<Slot>>> {
    let now = Utc::now();
    let from = query.from.map_or(now, |from| from.max(now));
    if let Some(to) = query.to {
        if to <= from {
            return Err(ApiError::BadRequest("'to' must be after 'from'".to_string()));
        }
    }
    Ok(Json(
        db::slots::list_open_slots(&state.db, id, from, query.to).await?,
    ))
}

/// GET /api/consultants/:id/ratings
pub async fn consultant_ratings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Rating>>> {
    Ok(Json(db::ratings::list_for_consultant(&state.db, id).await?))
}

pub fn consultant_routes() -> Router<AppState> {
    Router::new()
        .route("/api/consultants", get(list_consultants))
        .route("/api/consultants/:id", get(get_consultant))
        .route("/api/consultants/:id/availability", get(consultant_availability))
        .route("/api/consultants/:id/ratings", get(consultant_ratings))
}

// ========================================
// Own profile
// ========================================

/// Profile as seen by its owner (includes payout account)
#[derive(Debug, Serialize)]
pub struct OwnProfile {
    #[serde(flatten)]
    pub profile: ConsultantProfile,
    pub payout_account_id: Option<String>,
}

impl From<ConsultantProfile> for OwnProfile {
    fn from(profile: ConsultantProfile) -> Self {
        let payout_account_id = profile.payout_account_id.clone();
        Self {
            profile,
            payout_account_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub bio: String,
    pub hourly_rate_paise: i64,
    #[serde(default)]
    pub modules: Vec<String>,
    pub payout_account_id: Option<String>,
}

/// GET /api/profile
pub async fn get_own_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<OwnProfile>> {
    require_role(&auth, Role::Consultant)?;
    db::consultants::load_profile(&state.db, auth.id())
        .await?
        .map(|p| Json(p.into()))
        .ok_or_else(|| ApiError::NotFound("Consultant profile not found".to_string()))
}

/// PUT /api/profile
pub async fn update_own_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<ProfileRequest>,
) -> ApiResult<Json<OwnProfile>> {
    require_role(&auth, Role::Consultant)?;

    if req.hourly_rate_paise <= 0 {
        return Err(ApiError::BadRequest("hourly_rate_paise must be positive".to_string()));
    }
    if req.headline.chars().count() > MAX_HEADLINE_LEN || req.bio.chars().count() > MAX_BIO_LEN {
        return Err(ApiError::BadRequest(format!(
            "Headline/bio limited to {}/{} characters",
            MAX_HEADLINE_LEN, MAX_BIO_LEN
        )));
    }

    let mut module_ids = Vec::with_capacity(req.modules.len());
    for code in &req.modules {
        let code = code.trim().to_uppercase();
        let module = db::taxonomy::load_module_by_code(&state.db, &code)
            .await?
            .filter(|m| m.active)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown SAP module '{}'", code)))?;
        module_ids.push(module.id);
    }

    let update = ProfileUpdate {
        headline: req.headline.trim().to_string(),
        bio: req.bio.trim().to_string(),
        hourly_rate_paise: req.hourly_rate_paise,
        payout_account_id: req
            .payout_account_id
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty()),
        module_ids,
    };

    let mut tx = state.db.begin().await?;
    if !db::consultants::update_profile(&mut *tx, auth.id(), &update, Utc::now()).await? {
        return Err(ApiError::NotFound("Consultant profile not found".to_string()));
    }
    tx.commit().await?;

    tracing::info!(consultant_id = %auth.id(), rate = update.hourly_rate_paise, "Updated consultant profile");

    db::consultants::load_profile(&state.db, auth.id())
        .await?
        .map(|p| Json(p.into()))
        .ok_or_else(|| ApiError::Internal("Profile vanished after update".to_string()))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/api/profile", get(get_own_profile).put(update_own_profile))
}
