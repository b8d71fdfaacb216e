//! Orders and their status history

use chrono::{DateTime, Utc};
use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use super::opt_uuid;
use crate::models::{Order, OrderStatus, StatusChange};

const ORDER_COLUMNS: &str = r#"
    id, customer_id, consultant_id, slot_id, service_type_id, module_code, title,
    description, priority, status, amount_paise, platform_fee_paise, gateway_fee_paise,
    consultant_payout_paise, created_at, updated_at
"#;

fn row_to_order(row: &SqliteRow) -> Result<Order> {
    let id: String = row.get("id");
    let customer_id: String = row.get("customer_id");
    let consultant_id: String = row.get("consultant_id");
    let slot_id: String = row.get("slot_id");
    let service_type_id: String = row.get("service_type_id");
    let priority: String = row.get("priority");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Order {
        id: parse_uuid(&id)?,
        customer_id: parse_uuid(&customer_id)?,
        consultant_id: parse_uuid(&consultant_id)?,
        slot_id: parse_uuid(&slot_id)?,
        service_type_id: parse_uuid(&service_type_id)?,
        module_code: row.get("module_code"),
        title: row.get("title"),
        description: row.get("description"),
        priority: priority.parse()?,
        status: status.parse()?,
        amount_paise: row.get("amount_paise"),
        platform_fee_paise: row.get("platform_fee_paise"),
        gateway_fee_paise: row.get("gateway_fee_paise"),
        consultant_payout_paise: row.get("consultant_payout_paise"),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub async fn insert_order<'e, E>(executor: E, order: &Order) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, customer_id, consultant_id, slot_id, service_type_id, module_code, title,
            description, priority, status, amount_paise, platform_fee_paise, gateway_fee_paise,
            consultant_payout_paise, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(order.id.to_string())
    .bind(order.customer_id.to_string())
    .bind(order.consultant_id.to_string())
    .bind(order.slot_id.to_string())
    .bind(order.service_type_id.to_string())
    .bind(&order.module_code)
    .bind(&order.title)
    .bind(&order.description)
    .bind(order.priority.as_str())
    .bind(order.status.as_str())
    .bind(order.amount_paise)
    .bind(order.platform_fee_paise)
    .bind(order.gateway_fee_paise)
    .bind(order.consultant_payout_paise)
    .bind(format_ts(order.created_at))
    .bind(format_ts(order.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn load_order<'e, E>(executor: E, id: Uuid) -> Result<Option<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_order).transpose()
}

/// Filter for order listings
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Restrict to orders where this user is customer or consultant
    pub participant: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

/// Page of orders, newest first
pub async fn list_orders<'e, E>(
    executor: E,
    filter: &OrderFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"
        SELECT {} FROM orders
        WHERE (?1 IS NULL OR customer_id = ?1 OR consultant_id = ?1)
          AND (?2 IS NULL OR status = ?2)
        ORDER BY created_at DESC, id
        LIMIT ?3 OFFSET ?4
        "#,
        ORDER_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(filter.participant.map(|id| id.to_string()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await?;

    rows.iter().map(row_to_order).collect()
}

pub async fn count_orders<'e, E>(executor: E, filter: &OrderFilter) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM orders
        WHERE (?1 IS NULL OR customer_id = ?1 OR consultant_id = ?1)
          AND (?2 IS NULL OR status = ?2)
        "#,
    )
    .bind(filter.participant.map(|id| id.to_string()))
    .bind(filter.status.map(|s| s.as_str()))
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Conditional status change; false when the order already left `from`
pub async fn update_order_status<'e, E>(
    executor: E,
    id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result =
        sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(format_ts(now))
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(executor)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Pending orders whose slot hold lapsed before `now`
pub async fn list_expired_holds<'e, E>(executor: E, now: DateTime<Utc>) -> Result<Vec<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT o.* FROM orders o
        JOIN availability_slots s ON s.id = o.slot_id
        WHERE o.status = 'pending_payment'
          AND s.status = 'held'
          AND s.order_id = o.id
          AND s.held_until < ?
        ORDER BY o.created_at
        "#,
    )
    .bind(format_ts(now))
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_order).collect()
}

// ========================================
// Status history
// ========================================

pub async fn insert_status_change<'e, E>(
    executor: E,
    order_id: Uuid,
    from: Option<OrderStatus>,
    to: OrderStatus,
    changed_by: Option<Uuid>,
    note: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO order_status_history (order_id, from_status, to_status, changed_by, note, changed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(order_id.to_string())
    .bind(from.map(|s| s.as_str()))
    .bind(to.as_str())
    .bind(changed_by.map(|id| id.to_string()))
    .bind(note)
    .bind(format_ts(now))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn list_status_history<'e, E>(executor: E, order_id: Uuid) -> Result<Vec<StatusChange>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, order_id, from_status, to_status, changed_by, note, changed_at
        FROM order_status_history
        WHERE order_id = ?
        ORDER BY id
        "#,
    )
    .bind(order_id.to_string())
    .fetch_all(executor)
    .await?;

    rows.iter()
        .map(|row| -> Result<StatusChange> {
            let order_id: String = row.get("order_id");
            let from_status: Option<String> = row.get("from_status");
            let to_status: String = row.get("to_status");
            let changed_at: String = row.get("changed_at");

            Ok(StatusChange {
                id: row.get("id"),
                order_id: parse_uuid(&order_id)?,
                from_status: from_status.as_deref().map(str::parse).transpose()?,
                to_status: to_status.parse()?,
                changed_by: opt_uuid(row, "changed_by")?,
                note: row.get("note"),
                changed_at: parse_ts(&changed_at)?,
            })
        })
        .collect()
}
