//! Registration, login and session lookup

use chrono::{DateTime, Duration, Utc};
use pulse_common::api::{
    generate_salt, generate_session_token, hash_password, hash_token, verify_password,
};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{AuthUser, Role, User};

pub const MIN_PASSWORD_LEN: usize = 8;
const MAX_DISPLAY_NAME_LEN: usize = 120;

/// Hashed against on unknown emails so both login failures cost the same
const DUMMY_SALT: &str = "00000000000000000000000000000000";

/// Issued session
#[derive(Debug, Clone)]
pub struct LoginSession {
    /// Bearer token; returned once, only its hash is stored
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Lower-case and sanity-check an email address
pub fn normalize_email(email: &str) -> ApiResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !email.contains(' '),
        None => false,
    };
    if !valid {
        return Err(ApiError::BadRequest(format!("Invalid email address '{}'", email)));
    }
    Ok(email)
}

/// Create an account; consultants also get an empty profile
pub async fn register(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    display_name: &str,
    role: Role,
) -> ApiResult<User> {
    let email = normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let display_name = display_name.trim();
    if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "Display name must be 1..={} characters",
            MAX_DISPLAY_NAME_LEN
        )));
    }

    let user = User {
        id: Uuid::new_v4(),
        email,
        display_name: display_name.to_string(),
        role,
        created_at: Utc::now(),
    };
    let salt = generate_salt();
    let password_hash = {
        let (password, salt) = (password.to_string(), salt.clone());
        tokio::task::spawn_blocking(move || hash_password(&password, &salt))
            .await
            .map_err(|e| ApiError::Internal(format!("Password hashing task failed: {}", e)))?
    };

    let mut tx = pool.begin().await?;
    if let Err(e) = db::users::insert_user(&mut *tx, &user, &password_hash, &salt).await {
        return match e {
            pulse_common::Error::Database(ref db_err) if is_unique_violation(db_err) => Err(
                ApiError::Conflict(format!("Email '{}' is already registered", user.email)),
            ),
            other => Err(other.into()),
        };
    }
    if role == Role::Consultant {
        db::consultants::insert_empty_profile(&mut *tx, user.id, user.created_at).await?;
    }
    tx.commit().await?;

    info!(user_id = %user.id, role = %user.role, "Registered user");
    Ok(user)
}

/// Check credentials and issue a session
///
/// Unknown email and wrong password produce the same error.
pub async fn login(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    session_ttl_hours: i64,
) -> ApiResult<LoginSession> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let email = email.trim().to_lowercase();
    let credentials = match db::users::load_credentials_by_email(pool, &email).await? {
        Some(credentials) => credentials,
        None => {
            check_password(password, DUMMY_SALT, "").await?;
            return Err(invalid());
        }
    };

    if !check_password(password, &credentials.password_salt, &credentials.password_hash).await? {
        warn!(user_id = %credentials.user.id, "Login rejected: wrong password");
        return Err(invalid());
    }

    let token = generate_session_token();
    let now = Utc::now();
    let expires_at = now + Duration::hours(session_ttl_hours);
    db::sessions::insert_session(pool, &hash_token(&token), credentials.user.id, now, expires_at)
        .await?;

    info!(user_id = %credentials.user.id, "User logged in");
    Ok(LoginSession {
        token,
        expires_at,
        user: credentials.user,
    })
}

/// Password verification on the blocking pool
async fn check_password(password: &str, salt: &str, expected_hash: &str) -> ApiResult<bool> {
    let (password, salt, expected_hash) =
        (password.to_string(), salt.to_string(), expected_hash.to_string());
    tokio::task::spawn_blocking(move || verify_password(&password, &salt, &expected_hash))
        .await
        .map_err(|e| ApiError::Internal(format!("Password check task failed: {}", e)))
}

/// Resolve a bearer token to its user
pub async fn authenticate(pool: &SqlitePool, token: &str) -> ApiResult<AuthUser> {
    let token_hash = hash_token(token);
    let user = db::users::load_user_by_session(pool, &token_hash, Utc::now())
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired session".to_string()))?;

    Ok(AuthUser { user, token_hash })
}

pub async fn logout(pool: &SqlitePool, auth: &AuthUser) -> ApiResult<()> {
    db::sessions::delete_session(pool, &auth.token_hash).await?;
    info!(user_id = %auth.id(), "User logged out");
    Ok(())
}

/// Create the configured administrator if the email is not registered yet
pub async fn ensure_admin(pool: &SqlitePool, email: &str, password: &str) -> ApiResult<()> {
    let normalized = normalize_email(email)?;
    if db::users::load_credentials_by_email(pool, &normalized)
        .await?
        .is_some()
    {
        info!("Bootstrap admin {} already exists", normalized);
        return Ok(());
    }

    register(pool, &normalized, password, "Administrator", Role::Admin).await?;
    info!("Created bootstrap admin {}", normalized);
    Ok(())
}

/// Drop expired sessions
pub async fn purge_expired_sessions(pool: &SqlitePool) -> ApiResult<u64> {
    Ok(db::sessions::purge_expired(pool, Utc::now()).await?)
}
