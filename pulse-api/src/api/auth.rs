//! Session authentication and account endpoints
//!
//! Protected routes carry `Authorization: Bearer <token>`. The SSE endpoint
//! also accepts `?token=` because browser `EventSource` cannot set headers.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, Role, User};
use crate::services::accounts;
use crate::AppState;

/// Path that may pass its token as a query parameter
const SSE_PATH: &str = "/events";

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Authentication middleware
///
/// Resolves the session and inserts `AuthUser` into request extensions.
/// Returns 401 when the token is missing, unknown or expired.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).or_else(|| {
        if request.uri().path() == SSE_PATH {
            query_token(request.uri().query())
        } else {
            None
        }
    });

    let token = token.ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
    let auth = accounts::authenticate(&state.db, &token).await?;

    tracing::debug!(user_id = %auth.id(), path = %request.uri().path(), "Authenticated request");
    request.extensions_mut().insert(auth);

    Ok(next.run(request).await)
}

/// 403 unless the caller has `role`
pub fn require_role(auth: &AuthUser, role: Role) -> ApiResult<()> {
    if auth.role() == role {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("Requires {} role", role)))
    }
}

pub fn require_admin(auth: &AuthUser) -> ApiResult<()> {
    require_role(auth, Role::Admin)
}

// ========================================
// Account endpoints
// ========================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Customer
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.role == Role::Admin {
        return Err(ApiError::Forbidden(
            "Admin accounts cannot self-register".to_string(),
        ));
    }

    let user =
        accounts::register(&state.db, &req.email, &req.password, &req.display_name, req.role)
            .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let session = accounts::login(
        &state.db,
        &req.email,
        &req.password,
        state.config.auth.session_ttl_hours,
    )
    .await?;

    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        user: session.user,
    }))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<StatusCode> {
    accounts::logout(&state.db, &auth).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
pub async fn me(Extension(auth): Extension<AuthUser>) -> Json<User> {
    Json(auth.user)
}

/// Public account routes
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}

/// Routes for an authenticated session
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}
