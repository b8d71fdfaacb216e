//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in the `schema_version` table.
//! Tables are created with their current shape by `init`; migrations bring
//! databases created by older builds up to date and add secondary indexes.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - upgraded databases depend on them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Check before altering** - every migration must be safe to re-run

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version (0 when no migration has run)
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: lookup indexes and the one-active-order-per-slot constraint
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_slots_consultant_start
            ON availability_slots (consultant_id, starts_at)",
        "CREATE INDEX IF NOT EXISTS idx_slots_status_hold
            ON availability_slots (status, held_until)",
        "CREATE INDEX IF NOT EXISTS idx_orders_customer ON orders (customer_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_orders_consultant ON orders (consultant_id, created_at)",
        // A slot may back at most one order that is not cancelled
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_active_slot
            ON orders (slot_id) WHERE status <> 'cancelled'",
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_payments_order ON payments (order_id)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: record gateway failure reasons on payments
///
/// **Background:** early databases stored only the payment status; the
/// webhook handler now keeps the gateway's error description.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Add failure_reason column to payments");

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('payments') WHERE name = 'failure_reason'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  failure_reason column already exists - skipping");
        return Ok(());
    }

    match sqlx::query("ALTER TABLE payments ADD COLUMN failure_reason TEXT")
        .execute(pool)
        .await
    {
        Ok(_) => {
            info!("  ✓ Added failure_reason column to payments table");
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
            info!("  failure_reason column added concurrently - skipping");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
