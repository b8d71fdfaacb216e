//! Service types and SAP modules

use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use crate::models::{SapModule, ServiceType};

fn row_to_service_type(row: &SqliteRow) -> Result<ServiceType> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(ServiceType {
        id: parse_uuid(&id)?,
        name: row.get("name"),
        description: row.get("description"),
        active: row.get::<i64, _>("active") != 0,
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_module(row: &SqliteRow) -> Result<SapModule> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(SapModule {
        id: parse_uuid(&id)?,
        code: row.get("code"),
        name: row.get("name"),
        active: row.get::<i64, _>("active") != 0,
        created_at: parse_ts(&created_at)?,
    })
}

// ========================================
// Service types
// ========================================

pub async fn list_service_types<'e, E>(executor: E, include_inactive: bool) -> Result<Vec<ServiceType>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, name, description, active, created_at
        FROM service_types
        WHERE active = 1 OR ?
        ORDER BY name
        "#,
    )
    .bind(include_inactive)
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_service_type).collect()
}

pub async fn load_service_type<'e, E>(executor: E, id: Uuid) -> Result<Option<ServiceType>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, name, description, active, created_at FROM service_types WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_service_type).transpose()
}

pub async fn insert_service_type<'e, E>(executor: E, service_type: &ServiceType) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO service_types (id, name, description, active, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(service_type.id.to_string())
    .bind(&service_type.name)
    .bind(&service_type.description)
    .bind(service_type.active)
    .bind(format_ts(service_type.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Returns false when the row does not exist
pub async fn update_service_type<'e, E>(executor: E, service_type: &ServiceType) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE service_types SET name = ?, description = ?, active = ? WHERE id = ?",
    )
    .bind(&service_type.name)
    .bind(&service_type.description)
    .bind(service_type.active)
    .bind(service_type.id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Number of choices or orders pointing at a service type
pub async fn service_type_references<'e, E>(executor: E, id: Uuid) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM customer_choices WHERE service_type_id = ?1)
             + (SELECT COUNT(*) FROM orders WHERE service_type_id = ?1)
        "#,
    )
    .bind(id.to_string())
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub async fn delete_service_type<'e, E>(executor: E, id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM service_types WHERE id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

// ========================================
// SAP modules
// ========================================

pub async fn list_modules<'e, E>(executor: E, include_inactive: bool) -> Result<Vec<SapModule>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, code, name, active, created_at
        FROM sap_modules
        WHERE active = 1 OR ?
        ORDER BY code
        "#,
    )
    .bind(include_inactive)
    .fetch_all(executor)
    .await?;

    rows.iter().map(row_to_module).collect()
}

pub async fn load_module<'e, E>(executor: E, id: Uuid) -> Result<Option<SapModule>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, code, name, active, created_at FROM sap_modules WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_module).transpose()
}

pub async fn load_module_by_code<'e, E>(executor: E, code: &str) -> Result<Option<SapModule>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row =
        sqlx::query("SELECT id, code, name, active, created_at FROM sap_modules WHERE code = ?")
            .bind(code)
            .fetch_optional(executor)
            .await?;

    row.as_ref().map(row_to_module).transpose()
}

pub async fn insert_module<'e, E>(executor: E, module: &SapModule) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO sap_modules (id, code, name, active, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(module.id.to_string())
        .bind(&module.code)
        .bind(&module.name)
        .bind(module.active)
        .bind(format_ts(module.created_at))
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn update_module<'e, E>(executor: E, module: &SapModule) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE sap_modules SET code = ?, name = ?, active = ? WHERE id = ?")
        .bind(&module.code)
        .bind(&module.name)
        .bind(module.active)
        .bind(module.id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Number of consultant links and orders using a module
pub async fn module_references<'e, E>(executor: E, module: &SapModule) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT (SELECT COUNT(*) FROM consultant_modules WHERE module_id = ?)
             + (SELECT COUNT(*) FROM orders WHERE module_code = ?)
        "#,
    )
    .bind(module.id.to_string())
    .bind(&module.code)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub async fn delete_module<'e, E>(executor: E, id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM sap_modules WHERE id = ?")
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}
