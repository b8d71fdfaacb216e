//! Consultant profiles and module links

use chrono::{DateTime, Utc};
use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::models::ConsultantProfile;

const PROFILE_SELECT: &str = r#"
    SELECT p.user_id, u.display_name, p.headline, p.bio, p.hourly_rate_paise,
           p.rating_avg, p.rating_count, p.payout_account_id, p.updated_at,
           (SELECT GROUP_CONCAT(m.code, ',')
              FROM consultant_modules cm
              JOIN sap_modules m ON m.id = cm.module_id
             WHERE cm.consultant_id = p.user_id) AS module_codes
    FROM consultant_profiles p
    JOIN users u ON u.id = p.user_id
"#;

fn row_to_profile(row: &SqliteRow) -> Result<ConsultantProfile> {
    let user_id: String = row.get("user_id");
    let updated_at: String = row.get("updated_at");
    let module_codes: Option<String> = row.get("module_codes");

    let mut modules: Vec<String> = module_codes
        .unwrap_or_default()
        .split(',')
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect();
    modules.sort();

    Ok(ConsultantProfile {
        user_id: parse_uuid(&user_id)?,
        display_name: row.get("display_name"),
        headline: row.get("headline"),
        bio: row.get("bio"),
        hourly_rate_paise: row.get("hourly_rate_paise"),
        modules,
        rating_avg: row.get("rating_avg"),
        rating_count: row.get("rating_count"),
        payout_account_id: row.get("payout_account_id"),
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Empty profile created at consultant registration
pub async fn insert_empty_profile<'e, E>(executor: E, user_id: Uuid, now: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO consultant_profiles (user_id, updated_at) VALUES (?, ?)")
        .bind(user_id.to_string())
        .bind(format_ts(now))
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn load_profile<'e, E>(executor: E, user_id: Uuid) -> Result<Option<ConsultantProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("{} WHERE p.user_id = ?", PROFILE_SELECT);
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_profile).transpose()
}

/// Bookable consultants (rate set), optionally filtered by module code
pub async fn list_profiles<'e, E>(executor: E, module_code: Option<&str>) -> Result<Vec<ConsultantProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"{}
        WHERE p.hourly_rate_paise > 0
          AND (?1 IS NULL OR EXISTS (
                SELECT 1 FROM consultant_modules cm
                JOIN sap_modules m ON m.id = cm.module_id
                WHERE cm.consultant_id = p.user_id AND m.code = ?1))
        ORDER BY p.rating_avg DESC, u.display_name
        "#,
        PROFILE_SELECT
    );
    let rows = sqlx::query(&sql)
        .bind(module_code)
        .fetch_all(executor)
        .await?;

    rows.iter().map(row_to_profile).collect()
}

/// Editable profile fields
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub headline: String,
    pub bio: String,
    pub hourly_rate_paise: i64,
    pub payout_account_id: Option<String>,
    pub module_ids: Vec<Uuid>,
}

/// Replace profile fields and module links (run inside a transaction)
pub async fn update_profile(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    update: &ProfileUpdate,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE consultant_profiles
        SET headline = ?, bio = ?, hourly_rate_paise = ?, payout_account_id = ?, updated_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(&update.headline)
    .bind(&update.bio)
    .bind(update.hourly_rate_paise)
    .bind(&update.payout_account_id)
    .bind(format_ts(now))
    .bind(user_id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Ok(false);
    }

    sqlx::query("DELETE FROM consultant_modules WHERE consultant_id = ?")
        .bind(user_id.to_string())
        .execute(&mut *conn)
        .await?;

    for module_id in &update.module_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO consultant_modules (consultant_id, module_id) VALUES (?, ?)",
        )
        .bind(user_id.to_string())
        .bind(module_id.to_string())
        .execute(&mut *conn)
        .await?;
    }

    Ok(true)
}

/// Recompute rating aggregates from the ratings table
pub async fn refresh_rating<'e, E>(executor: E, consultant_id: Uuid, now: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE consultant_profiles
        SET rating_count = (SELECT COUNT(*) FROM ratings WHERE consultant_id = ?1),
            rating_avg = COALESCE((SELECT AVG(score) FROM ratings WHERE consultant_id = ?1), 0.0),
            updated_at = ?2
        WHERE user_id = ?1
        "#,
    )
    .bind(consultant_id.to_string())
    .bind(format_ts(now))
    .execute(executor)
    .await?;
    Ok(())
}
