//! Conversations and messages

use chrono::{DateTime, Utc};
use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use super::opt_ts;
use crate::models::{Conversation, Message};

pub async fn insert_conversation<'e, E>(executor: E, conversation: &Conversation) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO conversations (id, order_id, created_at) VALUES (?, ?, ?)")
        .bind(conversation.id.to_string())
        .bind(conversation.order_id.to_string())
        .bind(format_ts(conversation.created_at))
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn load_conversation_for_order<'e, E>(
    executor: E,
    order_id: Uuid,
) -> Result<Option<Conversation>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, order_id, created_at FROM conversations WHERE order_id = ?")
        .bind(order_id.to_string())
        .fetch_optional(executor)
        .await?;

    match row {
        Some(row) => {
            let id: String = row.get("id");
            let order_id: String = row.get("order_id");
            let created_at: String = row.get("created_at");
            Ok(Some(Conversation {
                id: parse_uuid(&id)?,
                order_id: parse_uuid(&order_id)?,
                created_at: parse_ts(&created_at)?,
            }))
        }
        None => Ok(None),
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    let id: String = row.get("id");
    let conversation_id: String = row.get("conversation_id");
    let sender_id: String = row.get("sender_id");
    let created_at: String = row.get("created_at");

    Ok(Message {
        id: parse_uuid(&id)?,
        conversation_id: parse_uuid(&conversation_id)?,
        sender_id: parse_uuid(&sender_id)?,
        body: row.get("body"),
        created_at: parse_ts(&created_at)?,
        read_at: opt_ts(row, "read_at")?,
    })
}

pub async fn insert_message<'e, E>(executor: E, message: &Message) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO messages (id, conversation_id, sender_id, body, created_at, read_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(message.id.to_string())
    .bind(message.conversation_id.to_string())
    .bind(message.sender_id.to_string())
    .bind(&message.body)
    .bind(format_ts(message.created_at))
    .bind(message.read_at.map(format_ts))
    .execute(executor)
    .await?;
    Ok(())
}

/// Page of messages, oldest first
pub async fn list_messages<'e, E>(
    executor: E,
    conversation_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Message>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, conversation_id, sender_id, body, created_at, read_at
        FROM messages
        WHERE conversation_id = ?
        ORDER BY created_at, id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(conversation_id.to_string())
    .bind(limit)
    .bind(offset)
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_message).collect()
}

pub async fn count_messages<'e, E>(executor: E, conversation_id: Uuid) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
        .bind(conversation_id.to_string())
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Mark unread messages not sent by `reader_id` as read
pub async fn mark_read<'e, E>(
    executor: E,
    conversation_id: Uuid,
    reader_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE messages SET read_at = ?
        WHERE conversation_id = ? AND sender_id <> ? AND read_at IS NULL
        "#,
    )
    .bind(format_ts(now))
    .bind(conversation_id.to_string())
    .bind(reader_id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
