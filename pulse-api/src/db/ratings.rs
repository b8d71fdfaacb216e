//! Consultant ratings

use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use crate::models::Rating;

/// Insert a rating; a second rating for the order is a unique violation
pub async fn insert_rating<'e, E>(executor: E, rating: &Rating) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO ratings (order_id, customer_id, consultant_id, score, comment, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(rating.order_id.to_string())
    .bind(rating.customer_id.to_string())
    .bind(rating.consultant_id.to_string())
    .bind(rating.score)
    .bind(&rating.comment)
    .bind(format_ts(rating.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn rating_exists<'e, E>(executor: E, order_id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE order_id = ?")
        .bind(order_id.to_string())
        .fetch_one(executor)
        .await?;
    Ok(count > 0)
}

/// Ratings received by a consultant, newest first
pub async fn list_for_consultant<'e, E>(executor: E, consultant_id: Uuid) -> Result<Vec<Rating>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT order_id, customer_id, consultant_id, score, comment, created_at
        FROM ratings
        WHERE consultant_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(consultant_id.to_string())
    .fetch_all(executor)
    .await?;

    let mut ratings = Vec::with_capacity(rows.len());
    for row in rows {
        let order_id: String = row.get("order_id");
        let customer_id: String = row.get("customer_id");
        let consultant_id: String = row.get("consultant_id");
        let created_at: String = row.get("created_at");
        ratings.push(Rating {
            order_id: parse_uuid(&order_id)?,
            customer_id: parse_uuid(&customer_id)?,
            consultant_id: parse_uuid(&consultant_id)?,
            score: row.get("score"),
            comment: row.get("comment"),
            created_at: parse_ts(&created_at)?,
        });
    }
    Ok(ratings)
}
