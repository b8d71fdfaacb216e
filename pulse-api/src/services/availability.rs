//! Publishing and withdrawing availability slots

use chrono::{DateTime, Utc};
use pulse_common::config::BookingSettings;
use pulse_common::time::minutes_between;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Slot, SlotStatus};

/// Validate and store a new open slot for `consultant_id`
pub async fn publish_slot(
    pool: &SqlitePool,
    booking: &BookingSettings,
    consultant_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> ApiResult<Slot> {
    let now = Utc::now();
    if starts_at <= now {
        return Err(ApiError::BadRequest("Slot must start in the future".to_string()));
    }
    if ends_at <= starts_at {
        return Err(ApiError::BadRequest("Slot must end after it starts".to_string()));
    }
    let minutes = minutes_between(starts_at, ends_at);
    if minutes < booking.min_slot_minutes || minutes > booking.max_slot_minutes {
        return Err(ApiError::BadRequest(format!(
            "Slot length {} min outside {}..={} min",
            minutes, booking.min_slot_minutes, booking.max_slot_minutes
        )));
    }

    let slot = Slot {
        id: Uuid::new_v4(),
        consultant_id,
        starts_at,
        ends_at,
        status: SlotStatus::Open,
        held_until: None,
        order_id: None,
        created_at: now,
    };

    // Overlap check and insert share one transaction
    let mut tx = pool.begin().await?;
    let overlapping =
        db::slots::count_overlapping(&mut *tx, consultant_id, starts_at, ends_at).await?;
    if overlapping > 0 {
        return Err(ApiError::Conflict(
            "Slot overlaps an existing availability slot".to_string(),
        ));
    }
    db::slots::insert_slot(&mut *tx, &slot).await?;
    tx.commit().await?;

    info!(slot_id = %slot.id, consultant_id = %consultant_id, minutes, "Published availability slot");
    Ok(slot)
}

/// Withdraw an open slot owned by `consultant_id`
pub async fn withdraw_slot(pool: &SqlitePool, consultant_id: Uuid, slot_id: Uuid) -> ApiResult<Slot> {
    let slot = db::slots::load_slot(pool, slot_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Slot {} not found", slot_id)))?;

    if slot.consultant_id != consultant_id {
        return Err(ApiError::Forbidden("Slot belongs to another consultant".to_string()));
    }
    if !db::slots::cancel_open_slot(pool, slot_id, consultant_id).await? {
        return Err(ApiError::Conflict(format!(
            "Slot is {} and cannot be withdrawn",
            slot.status
        )));
    }

    info!(slot_id = %slot_id, "Withdrew availability slot");
    Ok(Slot {
        status: SlotStatus::Cancelled,
        ..slot
    })
}
