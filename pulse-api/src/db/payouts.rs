//! Consultant payouts

use chrono::{DateTime, Utc};
use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use crate::models::{Payout, PayoutStatus};

const PAYOUT_COLUMNS: &str = "id, order_id, consultant_id, amount_paise, status, gateway_payout_id, \
                              failure_reason, created_at, updated_at";

fn row_to_payout(row: &SqliteRow) -> Result<Payout> {
    let id: String = row.get("id");
    let order_id: String = row.get("order_id");
    let consultant_id: String = row.get("consultant_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Payout {
        id: parse_uuid(&id)?,
        order_id: parse_uuid(&order_id)?,
        consultant_id: parse_uuid(&consultant_id)?,
        amount_paise: row.get("amount_paise"),
        status: status.parse()?,
        gateway_payout_id: row.get("gateway_payout_id"),
        failure_reason: row.get("failure_reason"),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub async fn insert_payout<'e, E>(executor: E, payout: &Payout) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO payouts (
            id, order_id, consultant_id, amount_paise, status, gateway_payout_id,
            failure_reason, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payout.id.to_string())
    .bind(payout.order_id.to_string())
    .bind(payout.consultant_id.to_string())
    .bind(payout.amount_paise)
    .bind(payout.status.as_str())
    .bind(&payout.gateway_payout_id)
    .bind(&payout.failure_reason)
    .bind(format_ts(payout.created_at))
    .bind(format_ts(payout.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn load_payout<'e, E>(executor: E, id: Uuid) -> Result<Option<Payout>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM payouts WHERE id = ?", PAYOUT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_payout).transpose()
}

/// Payouts of one consultant, or all when `consultant_id` is None
pub async fn list_payouts<'e, E>(executor: E, consultant_id: Option<Uuid>) -> Result<Vec<Payout>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM payouts WHERE (?1 IS NULL OR consultant_id = ?1) ORDER BY created_at DESC",
        PAYOUT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(consultant_id.map(|id| id.to_string()))
        .fetch_all(executor)
        .await?;

    rows.iter().map(row_to_payout).collect()
}

/// `Pending|Failed -> Processing`; false when another request holds the payout
pub async fn claim_payout<'e, E>(executor: E, id: Uuid, now: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payouts SET status = 'processing', updated_at = ?
        WHERE id = ? AND status IN ('pending', 'failed')
        "#,
    )
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Record the gateway outcome of a claimed payout
pub async fn record_outcome<'e, E>(
    executor: E,
    id: Uuid,
    status: PayoutStatus,
    gateway_payout_id: Option<&str>,
    failure_reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payouts
        SET status = ?, gateway_payout_id = ?, failure_reason = ?, updated_at = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(status.as_str())
    .bind(gateway_payout_id)
    .bind(failure_reason)
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}
