//! Background expiry of unpaid slot holds
//!
//! Every `sweep_interval_secs` the sweeper cancels `PendingPayment` orders
//! whose slot hold has lapsed, hands the slot back and expires the payment.

use chrono::Utc;
use pulse_common::events::PulseEvent;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Order, OrderStatus, PaymentStatus};
use crate::services::accounts;
use crate::AppState;

/// Spawn the periodic sweeper task
pub fn spawn_hold_sweeper(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.booking.sweep_interval_secs);
    info!("Hold sweeper running every {:?}", period);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match sweep_expired_holds(&state).await {
                Ok(report) if report.expired == 0 && report.failures.is_empty() => {
                    debug!("Hold sweep: nothing expired")
                }
                Ok(report) => info!(
                    expired = report.expired,
                    failed = report.failures.len(),
                    "Hold sweep: expired unpaid orders"
                ),
                Err(e) => error!("Hold sweep failed: {}", e),
            }
            if let Err(e) = accounts::purge_expired_sessions(&state.db).await {
                error!("Session purge failed: {}", e);
            }
        }
    })
}

/// Outcome of one sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Orders cancelled by this sweep
    pub expired: usize,
    /// Orders that could not be expired; retried on the next sweep
    pub failures: Vec<(Uuid, ApiError)>,
}

/// Cancel every pending order whose hold expired
///
/// A failing order is logged and skipped so it cannot hold back the rest.
pub async fn sweep_expired_holds(state: &AppState) -> ApiResult<SweepReport> {
    let now = Utc::now();
    let expired = db::orders::list_expired_holds(&state.db, now).await?;

    let mut report = SweepReport::default();
    for order in expired {
        match expire_order(state, &order).await {
            Ok(true) => report.expired += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Could not expire unpaid order");
                report.failures.push((order.id, e));
            }
        }
    }
    Ok(report)
}

async fn expire_order(state: &AppState, order: &Order) -> ApiResult<bool> {
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    // Lost the race to a capture or a cancellation
    if !db::orders::update_order_status(
        &mut *tx,
        order.id,
        OrderStatus::PendingPayment,
        OrderStatus::Cancelled,
        now,
    )
    .await?
    {
        return Ok(false);
    }

    db::slots::release_slot(&mut *tx, order.slot_id, order.id, now).await?;
    if let Some(payment) = db::payments::load_for_order(&mut *tx, order.id).await? {
        db::payments::close_uncaptured(
            &mut *tx,
            payment.id,
            PaymentStatus::Expired,
            Some("Payment window expired"),
            now,
        )
        .await?;
    }
    db::orders::insert_status_change(
        &mut *tx,
        order.id,
        Some(OrderStatus::PendingPayment),
        OrderStatus::Cancelled,
        None,
        "Payment window expired",
        now,
    )
    .await?;
    tx.commit().await?;

    info!(order_id = %order.id, slot_id = %order.slot_id, "Unpaid order expired, slot released");

    state.event_bus.emit_lossy(PulseEvent::OrderStatusChanged {
        order_id: order.id,
        customer_id: order.customer_id,
        consultant_id: order.consultant_id,
        old_status: OrderStatus::PendingPayment.to_string(),
        new_status: OrderStatus::Cancelled.to_string(),
        timestamp: now,
    });

    Ok(true)
}
