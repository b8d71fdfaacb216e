//! Availability slots
//!
//! Status changes are conditional updates: the `WHERE status = ...` guard
//! makes concurrent bookings of one slot race on the row, and exactly one
//! of them sees `rows_affected() == 1`.

use chrono::{DateTime, Utc};
use pulse_common::db::{format_ts, parse_ts, parse_uuid};
use pulse_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

use super::{opt_ts, opt_uuid};
use crate::models::{Slot, SlotStatus};

const SLOT_COLUMNS: &str =
    "id, consultant_id, starts_at, ends_at, status, held_until, order_id, created_at";

fn row_to_slot(row: &SqliteRow) -> Result<Slot> {
    let id: String = row.get("id");
    let consultant_id: String = row.get("consultant_id");
    let starts_at: String = row.get("starts_at");
    let ends_at: String = row.get("ends_at");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(Slot {
        id: parse_uuid(&id)?,
        consultant_id: parse_uuid(&consultant_id)?,
        starts_at: parse_ts(&starts_at)?,
        ends_at: parse_ts(&ends_at)?,
        status: status.parse()?,
        held_until: opt_ts(row, "held_until")?,
        order_id: opt_uuid(row, "order_id")?,
        created_at: parse_ts(&created_at)?,
    })
}

pub async fn insert_slot<'e, E>(executor: E, slot: &Slot) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO availability_slots
            (id, consultant_id, starts_at, ends_at, status, held_until, order_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(slot.id.to_string())
    .bind(slot.consultant_id.to_string())
    .bind(format_ts(slot.starts_at))
    .bind(format_ts(slot.ends_at))
    .bind(slot.status.as_str())
    .bind(slot.held_until.map(format_ts))
    .bind(slot.order_id.map(|id| id.to_string()))
    .bind(format_ts(slot.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn load_slot<'e, E>(executor: E, id: Uuid) -> Result<Option<Slot>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM availability_slots WHERE id = ?", SLOT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_slot).transpose()
}

/// Non-cancelled slots of a consultant intersecting `[starts_at, ends_at)`
pub async fn count_overlapping<'e, E>(
    executor: E,
    consultant_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM availability_slots
        WHERE consultant_id = ?
          AND status <> 'cancelled'
          AND starts_at < ?
          AND ends_at > ?
        "#,
    )
    .bind(consultant_id.to_string())
    .bind(format_ts(ends_at))
    .bind(format_ts(starts_at))
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Open slots of a consultant starting within an optional window
pub async fn list_open_slots<'e, E>(
    executor: E,
    consultant_id: Uuid,
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
) -> Result<Vec<Slot>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        r#"
        SELECT {} FROM availability_slots
        WHERE consultant_id = ?
          AND status = 'open'
          AND starts_at >= ?
          AND (? IS NULL OR starts_at < ?)
        ORDER BY starts_at
        "#,
        SLOT_COLUMNS
    );
    let to = to.map(format_ts);
    let rows = sqlx::query(&sql)
        .bind(consultant_id.to_string())
        .bind(format_ts(from))
        .bind(&to)
        .bind(&to)
        .fetch_all(executor)
        .await?;

    rows.iter().map(row_to_slot).collect()
}

/// Every slot of a consultant, newest first
pub async fn list_consultant_slots<'e, E>(executor: E, consultant_id: Uuid) -> Result<Vec<Slot>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM availability_slots WHERE consultant_id = ? ORDER BY starts_at DESC",
        SLOT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(consultant_id.to_string())
        .fetch_all(executor)
        .await?;

    rows.iter().map(row_to_slot).collect()
}

/// `Open -> Held` for `order_id`; false when the slot is no longer open
pub async fn hold_slot<'e, E>(
    executor: E,
    slot_id: Uuid,
    order_id: Uuid,
    held_until: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE availability_slots
        SET status = 'held', held_until = ?, order_id = ?
        WHERE id = ? AND status = 'open'
        "#,
    )
    .bind(format_ts(held_until))
    .bind(order_id.to_string())
    .bind(slot_id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `Held -> Booked` for the holding order
pub async fn book_slot<'e, E>(executor: E, slot_id: Uuid, order_id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE availability_slots
        SET status = 'booked', held_until = NULL
        WHERE id = ? AND status = 'held' AND order_id = ?
        "#,
    )
    .bind(slot_id.to_string())
    .bind(order_id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Detach a slot from a cancelled order
///
/// The slot reopens if it still starts after `now`, otherwise it is
/// cancelled. Only touches the slot while `order_id` still owns it.
pub async fn release_slot<'e, E>(
    executor: E,
    slot_id: Uuid,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE availability_slots
        SET status = CASE WHEN starts_at > ?1 THEN 'open' ELSE 'cancelled' END,
            held_until = NULL,
            order_id = NULL
        WHERE id = ?2 AND order_id = ?3 AND status IN ('held', 'booked')
        "#,
    )
    .bind(format_ts(now))
    .bind(slot_id.to_string())
    .bind(order_id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `Open -> Cancelled` by the owning consultant
pub async fn cancel_open_slot<'e, E>(executor: E, slot_id: Uuid, consultant_id: Uuid) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE availability_slots SET status = ?
        WHERE id = ? AND consultant_id = ? AND status = 'open'
        "#,
    )
    .bind(SlotStatus::Cancelled.as_str())
    .bind(slot_id.to_string())
    .bind(consultant_id.to_string())
    .execute(executor)
    .await?;
    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::insert_user;
    use crate::models::{Role, User};
    use chrono::Duration;
    use pulse_common::db::init_memory_database;
    use sqlx::SqlitePool;

    async fn consultant(pool: &SqlitePool) -> Uuid {
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4()),
            display_name: "Ravi".into(),
            role: Role::Consultant,
            created_at: Utc::now(),
        };
        insert_user(pool, &user, "h", "s").await.unwrap();
        user.id
    }

    fn open_slot(consultant_id: Uuid, starts_at: DateTime<Utc>) -> Slot {
        Slot {
            id: Uuid::new_v4(),
            consultant_id,
            starts_at,
            ends_at: starts_at + Duration::minutes(60),
            status: SlotStatus::Open,
            held_until: None,
            order_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_hold_only_succeeds_once() {
        let pool = init_memory_database().await.unwrap();
        let consultant_id = consultant(&pool).await;
        let slot = open_slot(consultant_id, Utc::now() + Duration::days(1));
        insert_slot(&pool, &slot).await.unwrap();

        let until = Utc::now() + Duration::minutes(15);
        assert!(hold_slot(&pool, slot.id, Uuid::new_v4(), until).await.unwrap());
        assert!(!hold_slot(&pool, slot.id, Uuid::new_v4(), until).await.unwrap());

        let loaded = load_slot(&pool, slot.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SlotStatus::Held);
        assert!(loaded.held_until.is_some());
    }

    #[tokio::test]
    async fn test_release_reopens_future_and_cancels_past() {
        let pool = init_memory_database().await.unwrap();
        let consultant_id = consultant(&pool).await;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let future = open_slot(consultant_id, now + Duration::days(1));
        let past = open_slot(consultant_id, now - Duration::hours(3));
        for slot in [&future, &past] {
            insert_slot(&pool, slot).await.unwrap();
            hold_slot(&pool, slot.id, order_id, now).await.unwrap();
        }

        // Wrong owner leaves the slot alone
        assert!(!release_slot(&pool, future.id, Uuid::new_v4(), now).await.unwrap());

        assert!(release_slot(&pool, future.id, order_id, now).await.unwrap());
        assert!(release_slot(&pool, past.id, order_id, now).await.unwrap());

        let future = load_slot(&pool, future.id).await.unwrap().unwrap();
        assert_eq!(future.status, SlotStatus::Open);
        assert!(future.order_id.is_none());
        let past = load_slot(&pool, past.id).await.unwrap().unwrap();
        assert_eq!(past.status, SlotStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_overlap_count_ignores_cancelled_and_adjacent() {
        let pool = init_memory_database().await.unwrap();
        let consultant_id = consultant(&pool).await;
        let start = Utc::now() + Duration::days(2);
        let slot = open_slot(consultant_id, start);
        insert_slot(&pool, &slot).await.unwrap();

        let adjacent = count_overlapping(
            &pool,
            consultant_id,
            start + Duration::minutes(60),
            start + Duration::minutes(90),
        )
        .await
        .unwrap();
        assert_eq!(adjacent, 0);

        let inside = count_overlapping(
            &pool,
            consultant_id,
            start + Duration::minutes(30),
            start + Duration::minutes(90),
        )
        .await
        .unwrap();
        assert_eq!(inside, 1);

        assert!(cancel_open_slot(&pool, slot.id, consultant_id).await.unwrap());
        let after_cancel = count_overlapping(&pool, consultant_id, start, start + Duration::minutes(60))
            .await
            .unwrap();
        assert_eq!(after_cancel, 0);
    }
}
