//! User accounts

use chrono::{DateTime, Utc};
use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use crate::models::{Role, User};

/// User row including credentials (never leaves the service)
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
    pub password_salt: String,
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    let id: String = row.get("id");
    let role: String = row.get("role");
    let created_at: String = row.get("created_at");

    Ok(User {
        id: parse_uuid(&id)?,
        email: row.get("email"),
        display_name: row.get("display_name"),
        role: role.parse()?,
        created_at: parse_ts(&created_at)?,
    })
}

/// Insert a new user; duplicate email surfaces as a unique violation
pub async fn insert_user<'e, E>(
    executor: E,
    user: &User,
    password_hash: &str,
    password_salt: &str,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO users (id, email, display_name, role, password_hash, password_salt, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user.id.to_string())
    .bind(&user.email)
    .bind(&user.display_name)
    .bind(user.role.as_str())
    .bind(password_hash)
    .bind(password_salt)
    .bind(format_ts(user.created_at))
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn load_user<'e, E>(executor: E, id: Uuid) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, email, display_name, role, created_at FROM users WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_user).transpose()
}

/// Load a user with credentials by (lower-cased) email
pub async fn load_credentials_by_email<'e, E>(
    executor: E,
    email: &str,
) -> Result<Option<UserCredentials>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, email, display_name, role, created_at, password_hash, password_salt
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(UserCredentials {
            user: row_to_user(&row)?,
            password_hash: row.get("password_hash"),
            password_salt: row.get("password_salt"),
        })),
        None => Ok(None),
    }
}

/// Load the user owning a live session
pub async fn load_user_by_session<'e, E>(
    executor: E,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT u.id, u.email, u.display_name, u.role, u.created_at
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = ? AND s.expires_at > ?
        "#,
    )
    .bind(token_hash)
    .bind(format_ts(now))
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_user).transpose()
}

pub async fn count_users_with_role<'e, E>(executor: E, role: Role) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = ?")
        .bind(role.as_str())
        .fetch_one(executor)
        .await?;
    Ok(count)
}
