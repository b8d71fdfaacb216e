//! Customer choices (pre-booking selections)

use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use crate::models::{ChoiceStatus, CustomerChoice};

fn row_to_choice(row: &SqliteRow) -> Result<CustomerChoice> {
    let id: String = row.get("id");
    let customer_id: String = row.get("customer_id");
    let service_type_id: String = row.get("service_type_id");
    let consultant_id: String = row.get("consultant_id");
    let slot_id: String = row.get("slot_id");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(CustomerChoice {
        id: parse_uuid(&id)?,
        customer_id: parse_uuid(&customer_id)?,
        service_type_id: parse_uuid(&service_type_id)?,
        consultant_id: parse_uuid(&consultant_id)?,
        slot_id: parse_uuid(&slot_id)?,
        status: status.parse()?,
        created_at: parse_ts(&created_at)?,
    })
}

pub async fn insert_choice<'e, E>(executor: E, choice: &CustomerChoice) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO customer_choices
            (id, customer_id, service_type_id, consultant_id, slot_id, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(choice.id.to_string())
    .bind(choice.customer_id.to_string())
    .bind(choice.service_type_id.to_string())
    .bind(choice.consultant_id.to_string())
    .bind(choice.slot_id.to_string())
    .bind(choice.status.as_str())
    .bind(format_ts(choice.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn load_choice<'e, E>(executor: E, id: Uuid) -> Result<Option<CustomerChoice>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT id, customer_id, service_type_id, consultant_id, slot_id, status, created_at
        FROM customer_choices WHERE id = ?
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_choice).transpose()
}

/// Conditional status change; false when the choice is not in `from`
pub async fn update_choice_status<'e, E>(
    executor: E,
    id: Uuid,
    from: ChoiceStatus,
    to: ChoiceStatus,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE customer_choices SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}
