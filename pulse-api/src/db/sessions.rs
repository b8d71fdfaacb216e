//! Login sessions (only the token hash is stored)

use chrono::{DateTime, Utc};
use pulse_common::db::format_ts;
use pulse_common::Result;
use sqlx::{Executor, Sqlite};
use uuid::Uuid;

pub async fn insert_session<'e, E>(
    executor: E,
    token_hash: &str,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(token_hash)
    .bind(user_id.to_string())
    .bind(format_ts(created_at))
    .bind(format_ts(expires_at))
    .execute(executor)
    .await?;

    Ok(())
}

/// Returns true if a session was removed
pub async fn delete_session<'e, E>(executor: E, token_hash: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(token_hash)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove expired sessions, returning how many were deleted
pub async fn purge_expired<'e, E>(executor: E, now: DateTime<Utc>) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(format_ts(now))
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}
