//! Processed gateway webhook events

use chrono::{DateTime, Utc};
use pulse_common::db::format_ts;
use pulse_common::Result;
use sqlx::{Executor, Sqlite};

pub async fn event_seen<'e, E>(executor: E, event_id: &str) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM webhook_events WHERE event_id = ?")
        .bind(event_id)
        .fetch_one(executor)
        .await?;
    Ok(count > 0)
}

/// Returns false when the event was already recorded
pub async fn record_event<'e, E>(
    executor: E,
    event_id: &str,
    event_type: &str,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO webhook_events (event_id, event_type, received_at) VALUES (?, ?, ?)",
    )
    .bind(event_id)
    .bind(event_type)
    .bind(format_ts(now))
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}
