//! Service types and SAP modules
//!
//! Anyone may read the active catalogue; admins maintain it. Deleting an
//! entry that is still referenced deactivates it instead.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::require_admin;
use crate::db;
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{AuthUser, SapModule, ServiceType};
use crate::AppState;

const MAX_NAME_LEN: usize = 120;
const MAX_CODE_LEN: usize = 16;

/// Outcome of an admin delete
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub id: Uuid,
    /// "deleted" or "deactivated"
    pub outcome: &'static str,
}

fn conflict_on_duplicate(err: pulse_common::Error, what: &str) -> ApiError {
    match err {
        pulse_common::Error::Database(ref e) if is_unique_violation(e) => {
            ApiError::Conflict(format!("{} already exists", what))
        }
        other => other.into(),
    }
}

fn validate_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "Name must be 1..={} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_code(code: &str) -> ApiResult<String> {
    let code = code.trim().to_uppercase();
    let valid = !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/');
    if !valid {
        return Err(ApiError::BadRequest(format!("Invalid module code '{}'", code)));
    }
    Ok(code)
}

// ========================================
// Public catalogue
// ========================================

/// GET /api/service-types
pub async fn list_service_types(State(state): State<AppState>) -> ApiResult<Json<Vec<ServiceType>>> {
    Ok(Json(db::taxonomy::list_service_types(&state.db, false).await?))
}

/// GET /api/modules
pub async fn list_modules(State(state): State<AppState>) -> ApiResult<Json<Vec<SapModule>>> {
    Ok(Json(db::taxonomy::list_modules(&state.db, false).await?))
}

pub fn catalogue_routes() -> Router<AppState> {
    Router::new()
        .route("/api/service-types", get(list_service_types))
        .route("/api/modules", get(list_modules))
}

// ========================================
// Admin: service types
// ========================================

#[derive(Debug, Deserialize)]
pub struct ServiceTypeRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// GET /api/admin/service-types (includes inactive)
pub async fn admin_list_service_types(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<ServiceType>>> {
    require_admin(&auth)?;
    Ok(Json(db::taxonomy::list_service_types(&state.db, true).await?))
}

/// POST /api/admin/service-types
pub async fn create_service_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<ServiceTypeRequest>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&auth)?;

    let service_type = ServiceType {
        id: Uuid::new_v4(),
        name: validate_name(&req.name)?,
        description: req.description.trim().to_string(),
        active: req.active,
        created_at: Utc::now(),
    };
    db::taxonomy::insert_service_type(&state.db, &service_type)
        .await
        .map_err(|e| conflict_on_duplicate(e, "Service type"))?;

    tracing::info!(service_type_id = %service_type.id, name = %service_type.name, "Created service type");
    Ok((StatusCode::CREATED, Json(service_type)))
}

/// PUT /api/admin/service-types/:id
pub async fn update_service_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ServiceTypeRequest>,
) -> ApiResult<Json<ServiceType>> {
    require_admin(&auth)?;

    let existing = db::taxonomy::load_service_type(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Service type {} not found", id)))?;
    let updated = ServiceType {
        name: validate_name(&req.name)?,
        description: req.description.trim().to_string(),
        active: req.active,
        ..existing
    };
    db::taxonomy::update_service_type(&state.db, &updated)
        .await
        .map_err(|e| conflict_on_duplicate(e, "Service type"))?;

    Ok(Json(updated))
}

/// DELETE /api/admin/service-types/:id
pub async fn delete_service_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    require_admin(&auth)?;

    let existing = db::taxonomy::load_service_type(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Service type {} not found", id)))?;

    let outcome = if db::taxonomy::service_type_references(&state.db, id).await? > 0 {
        db::taxonomy::update_service_type(
            &state.db,
            &ServiceType {
                active: false,
                ..existing
            },
        )
        .await?;
        "deactivated"
    } else {
        db::taxonomy::delete_service_type(&state.db, id).await?;
        "deleted"
    };

    tracing::info!(service_type_id = %id, outcome, "Removed service type");
    Ok(Json(DeleteResponse { id, outcome }))
}

// ========================================
// Admin: SAP modules
// ========================================

#[derive(Debug, Deserialize)]
pub struct ModuleRequest {
    pub code: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// GET /api/admin/modules (includes inactive)
pub async fn admin_list_modules(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<SapModule>>> {
    require_admin(&auth)?;
    Ok(Json(db::taxonomy::list_modules(&state.db, true).await?))
}

/// POST /api/admin/modules
pub async fn create_module(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<ModuleRequest>,
) -> ApiResult<impl IntoResponse> {
    require_admin(&auth)?;

    let module = SapModule {
        id: Uuid::new_v4(),
        code: validate_code(&req.code)?,
        name: validate_name(&req.name)?,
        active: req.active,
        created_at: Utc::now(),
    };
    db::taxonomy::insert_module(&state.db, &module)
        .await
        .map_err(|e| conflict_on_duplicate(e, "Module code"))?;

    tracing::info!(module_id = %module.id, code = %module.code, "Created SAP module");
    Ok((StatusCode::CREATED, Json(module)))
}

/// PUT /api/admin/modules/:id
pub async fn update_module(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<ModuleRequest>,
) -> ApiResult<Json<SapModule>> {
    require_admin(&auth)?;

    let existing = db::taxonomy::load_module(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Module {} not found", id)))?;
    let code = validate_code(&req.code)?;

    // Orders keep the code as text; renaming a used code would orphan them
    if code != existing.code && db::taxonomy::module_references(&state.db, &existing).await? > 0 {
        return Err(ApiError::Conflict(format!(
            "Module {} is in use and cannot be renamed",
            existing.code
        )));
    }

    let updated = SapModule {
        code,
        name: validate_name(&req.name)?,
        active: req.active,
        ..existing
    };
    db::taxonomy::update_module(&state.db, &updated)
        .await
        .map_err(|e| conflict_on_duplicate(e, "Module code"))?;

    Ok(Json(updated))
}

/// DELETE /api/admin/modules/:id
pub async fn delete_module(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteResponse>> {
    require_admin(&auth)?;

    let existing = db::taxonomy::load_module(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Module {} not found", id)))?;

    let outcome = if db::taxonomy::module_references(&state.db, &existing).await? > 0 {
        db::taxonomy::update_module(
            &state.db,
            &SapModule {
                active: false,
                ..existing
            },
        )
        .await?;
        "deactivated"
    } else {
        db::taxonomy::delete_module(&state.db, id).await?;
        "deleted"
    };

    tracing::info!(module_id = %id, outcome, "Removed SAP module");
    Ok(Json(DeleteResponse { id, outcome }))
}

pub fn admin_taxonomy_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/admin/service-types",
            get(admin_list_service_types).post(create_service_type),
        )
        .route(
            "/api/admin/service-types/:id",
            put(update_service_type).delete(delete_service_type),
        )
        .route("/api/admin/modules", get(admin_list_modules).post(create_module))
        .route("/api/admin/modules/:id", put(update_module).delete(delete_module))
}
