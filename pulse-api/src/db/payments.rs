//! Gateway payments and escrow state

use chrono::{DateTime, Utc};
use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use crate::models::{EscrowStatus, Payment, PaymentStatus};

const PAYMENT_COLUMNS: &str = r#"
    id, order_id, gateway_order_id, gateway_payment_id, amount_paise, currency, status,
    escrow_status, refund_id, failure_reason, created_at, updated_at
"#;

fn row_to_payment(row: &SqliteRow) -> Result<Payment> {
    let id: String = row.get("id");
    let order_id: String = row.get("order_id");
    let status: String = row.get("status");
    let escrow_status: String = row.get("escrow_status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Payment {
        id: parse_uuid(&id)?,
        order_id: parse_uuid(&order_id)?,
        gateway_order_id: row.get("gateway_order_id"),
        gateway_payment_id: row.get("gateway_payment_id"),
        amount_paise: row.get("amount_paise"),
        currency: row.get("currency"),
        status: status.parse()?,
        escrow_status: escrow_status.parse()?,
        refund_id: row.get("refund_id"),
        failure_reason: row.get("failure_reason"),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub async fn insert_payment<'e, E>(executor: E, payment: &Payment) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO payments (
            id, order_id, gateway_order_id, gateway_payment_id, amount_paise, currency, status,
            escrow_status, refund_id, failure_reason, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(payment.id.to_string())
    .bind(payment.order_id.to_string())
    .bind(&payment.gateway_order_id)
    .bind(&payment.gateway_payment_id)
    .bind(payment.amount_paise)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(payment.escrow_status.as_str())
    .bind(&payment.refund_id)
    .bind(&payment.failure_reason)
    .bind(format_ts(payment.created_at))
    .bind(format_ts(payment.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn load_by_gateway_order<'e, E>(executor: E, gateway_order_id: &str) -> Result<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM payments WHERE gateway_order_id = ?", PAYMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(gateway_order_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_payment).transpose()
}

pub async fn load_by_gateway_payment<'e, E>(
    executor: E,
    gateway_payment_id: &str,
) -> Result<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM payments WHERE gateway_payment_id = ?", PAYMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(gateway_payment_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_payment).transpose()
}

/// Latest payment of an order
pub async fn load_for_order<'e, E>(executor: E, order_id: Uuid) -> Result<Option<Payment>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM payments WHERE order_id = ? ORDER BY created_at DESC LIMIT 1",
        PAYMENT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(order_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_payment).transpose()
}

/// `Created -> Captured` with the given escrow state
pub async fn mark_captured<'e, E>(
    executor: E,
    id: Uuid,
    gateway_payment_id: &str,
    escrow: EscrowStatus,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'captured', gateway_payment_id = ?, escrow_status = ?, updated_at = ?
        WHERE id = ? AND status = 'created'
        "#,
    )
    .bind(gateway_payment_id)
    .bind(escrow.as_str())
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Capture reported for a payment already closed locally
///
/// Funds exist at the gateway but no order awaits them, so nothing goes to
/// escrow. The caller refunds.
pub async fn record_late_capture<'e, E>(
    executor: E,
    id: Uuid,
    gateway_payment_id: &str,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'captured', gateway_payment_id = ?, escrow_status = 'none', updated_at = ?
        WHERE id = ? AND status IN ('created', 'failed', 'expired', 'cancelled')
        "#,
    )
    .bind(gateway_payment_id)
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Close out an uncaptured payment (`Failed`, `Expired` or `Cancelled`)
pub async fn close_uncaptured<'e, E>(
    executor: E,
    id: Uuid,
    status: PaymentStatus,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = ?, failure_reason = COALESCE(?, failure_reason), updated_at = ?
        WHERE id = ? AND status = 'created'
        "#,
    )
    .bind(status.as_str())
    .bind(reason)
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `Captured -> Refunded`, escrow `Refunded`
pub async fn mark_refunded<'e, E>(
    executor: E,
    id: Uuid,
    refund_id: &str,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'refunded', escrow_status = 'refunded', refund_id = ?, updated_at = ?
        WHERE id = ? AND status = 'captured' AND escrow_status <> 'released'
        "#,
    )
    .bind(refund_id)
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Escrow `Held -> Refunding`; false when another request already claimed it
pub async fn begin_refund<'e, E>(executor: E, id: Uuid, now: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payments SET escrow_status = 'refunding', updated_at = ?
        WHERE id = ? AND status = 'captured' AND escrow_status = 'held'
        "#,
    )
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Escrow `Refunding -> Held` after the gateway refused the refund
pub async fn abort_refund<'e, E>(executor: E, id: Uuid, now: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payments SET escrow_status = 'held', updated_at = ?
        WHERE id = ? AND status = 'captured' AND escrow_status = 'refunding'
        "#,
    )
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Escrow `Held -> Released`; false when nothing is held
pub async fn release_escrow<'e, E>(executor: E, id: Uuid, now: DateTime<Utc>) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE payments SET escrow_status = 'released', updated_at = ?
        WHERE id = ? AND status = 'captured' AND escrow_status = 'held'
        "#,
    )
    .bind(format_ts(now))
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}
