//! Database access for pulse-api
//!
//! Free functions over SQLite. Functions that take a generic `Executor` run
//! against the pool or inside a transaction (`&mut *tx`).

pub mod choices;
pub mod consultants;
pub mod messages;
pub mod orders;
pub mod payments;
pub mod payouts;
pub mod ratings;
pub mod sessions;
pub mod slots;
pub mod taxonomy;
pub mod users;
pub mod webhook_events;

use pulse_common::db::parse_ts;
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Read an optional timestamp column
pub(crate) fn opt_ts(row: &SqliteRow, column: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let value: Option<String> = row.get(column);
    value.as_deref().map(parse_ts).transpose()
}

/// Read an optional UUID column
pub(crate) fn opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<uuid::Uuid>> {
    let value: Option<String> = row.get(column);
    value.as_deref().map(pulse_common::db::parse_uuid).transpose()
}
