//! Database initialization
//!
//! Opens (or creates) the SQLite database, creates every table idempotently,
//! runs versioned migrations and seeds the default taxonomy.

use crate::db::codec::format_ts;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Busy timeout applied to every connection
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema (tests and tooling)
///
/// A single never-recycled connection keeps the memory database alive for
/// the lifetime of the pool.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables, migrate, seed (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_users_table(pool).await?;
    create_sessions_table(pool).await?;

    // Taxonomy
    create_service_types_table(pool).await?;
    create_sap_modules_table(pool).await?;

    // Consultants and availability
    create_consultant_profiles_table(pool).await?;
    create_consultant_modules_table(pool).await?;
    create_availability_slots_table(pool).await?;

    // Booking and tickets
    create_customer_choices_table(pool).await?;
    create_orders_table(pool).await?;
    create_order_status_history_table(pool).await?;
    create_conversations_table(pool).await?;
    create_messages_table(pool).await?;
    create_ratings_table(pool).await?;

    // Money movement
    create_payments_table(pool).await?;
    create_payouts_table(pool).await?;
    create_webhook_events_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    seed_taxonomy(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Key-value settings
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('customer', 'consultant', 'admin')),
            password_hash TEXT NOT NULL,
            password_salt TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_service_types_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_types (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_sap_modules_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sap_modules (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_consultant_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consultant_profiles (
            user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
            headline TEXT NOT NULL DEFAULT '',
            bio TEXT NOT NULL DEFAULT '',
            hourly_rate_paise INTEGER NOT NULL DEFAULT 0,
            rating_avg REAL NOT NULL DEFAULT 0.0,
            rating_count INTEGER NOT NULL DEFAULT 0,
            payout_account_id TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_consultant_modules_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consultant_modules (
            consultant_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            module_id TEXT NOT NULL REFERENCES sap_modules(id),
            PRIMARY KEY (consultant_id, module_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_availability_slots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS availability_slots (
            id TEXT PRIMARY KEY,
            consultant_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('open', 'held', 'booked', 'cancelled')),
            held_until TEXT,
            order_id TEXT,
            created_at TEXT NOT NULL,
            CHECK (ends_at > starts_at)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_customer_choices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customer_choices (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL REFERENCES users(id),
            service_type_id TEXT NOT NULL REFERENCES service_types(id),
            consultant_id TEXT NOT NULL REFERENCES users(id),
            slot_id TEXT NOT NULL REFERENCES availability_slots(id),
            status TEXT NOT NULL CHECK (status IN ('pending', 'converted', 'abandoned')),
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_orders_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL REFERENCES users(id),
            consultant_id TEXT NOT NULL REFERENCES users(id),
            slot_id TEXT NOT NULL REFERENCES availability_slots(id),
            service_type_id TEXT NOT NULL REFERENCES service_types(id),
            module_code TEXT,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            priority TEXT NOT NULL,
            status TEXT NOT NULL,
            amount_paise INTEGER NOT NULL,
            platform_fee_paise INTEGER NOT NULL,
            gateway_fee_paise INTEGER NOT NULL,
            consultant_payout_paise INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (platform_fee_paise + gateway_fee_paise + consultant_payout_paise = amount_paise)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_order_status_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_status_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            from_status TEXT,
            to_status TEXT NOT NULL,
            changed_by TEXT,
            note TEXT NOT NULL DEFAULT '',
            changed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_conversations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL UNIQUE REFERENCES orders(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_messages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id TEXT NOT NULL REFERENCES users(id),
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            read_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_ratings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ratings (
            order_id TEXT PRIMARY KEY REFERENCES orders(id),
            customer_id TEXT NOT NULL REFERENCES users(id),
            consultant_id TEXT NOT NULL REFERENCES users(id),
            score INTEGER NOT NULL CHECK (score BETWEEN 1 AND 5),
            comment TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_payments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id),
            gateway_order_id TEXT NOT NULL UNIQUE,
            gateway_payment_id TEXT,
            amount_paise INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL,
            escrow_status TEXT NOT NULL,
            refund_id TEXT,
            failure_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_payouts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payouts (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL UNIQUE REFERENCES orders(id),
            consultant_id TEXT NOT NULL REFERENCES users(id),
            amount_paise INTEGER NOT NULL CHECK (amount_paise >= 0),
            status TEXT NOT NULL,
            gateway_payout_id TEXT,
            failure_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_webhook_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            received_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Default service types and SAP modules
const DEFAULT_SERVICE_TYPES: &[(&str, &str)] = &[
    ("Incident Support", "Hands-on help with a live system issue"),
    ("Health Check", "Review of system configuration and performance"),
    ("Upgrade Consulting", "Planning and guidance for release upgrades"),
];

const DEFAULT_MODULES: &[(&str, &str)] = &[
    ("BASIS", "SAP Basis Administration"),
    ("HANA", "SAP HANA Database"),
    ("FI", "Financial Accounting"),
    ("MM", "Materials Management"),
    ("SD", "Sales and Distribution"),
];

/// Insert default taxonomy entries into empty tables
async fn seed_taxonomy(pool: &SqlitePool) -> Result<()> {
    let now = format_ts(chrono::Utc::now());

    let service_type_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM service_types")
        .fetch_one(pool)
        .await?;
    if service_type_count == 0 {
        for (name, description) in DEFAULT_SERVICE_TYPES {
            sqlx::query(
                "INSERT INTO service_types (id, name, description, active, created_at)
                 VALUES (?, ?, ?, 1, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .bind(description)
            .bind(&now)
            .execute(pool)
            .await?;
        }
        info!("Seeded {} default service types", DEFAULT_SERVICE_TYPES.len());
    }

    let module_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sap_modules")
        .fetch_one(pool)
        .await?;
    if module_count == 0 {
        for (code, name) in DEFAULT_MODULES {
            sqlx::query(
                "INSERT INTO sap_modules (id, code, name, active, created_at)
                 VALUES (?, ?, ?, 1, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(code)
            .bind(name)
            .bind(&now)
            .execute(pool)
            .await?;
        }
        info!("Seeded {} default SAP modules", DEFAULT_MODULES.len());
    }

    Ok(())
}
