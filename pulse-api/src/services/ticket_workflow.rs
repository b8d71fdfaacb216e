//! Ticket status workflow
//!
//! Who may move an order where is decided by `models::transition_actors`.
//! Side effects ride along in the same transaction as the status change:
//! cancellation releases the slot (refunding paid orders first), closing
//! releases escrow and queues the consultant payout.
//!
//! Cancelling a paid order claims it (`Cancelled`, escrow `Refunding`)
//! before the gateway refund and reverts the claim if the refund fails.

use chrono::Utc;
use pulse_common::events::PulseEvent;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    transition_actors, AuthUser, EscrowStatus, Order, OrderStatus, PaymentStatus, Payout,
    PayoutStatus,
};
use crate::AppState;

const MAX_NOTE_LEN: usize = 2000;

/// Move `order_id` to `to` on behalf of `caller`
pub async fn change_status(
    state: &AppState,
    caller: &AuthUser,
    order_id: Uuid,
    to: OrderStatus,
    note: &str,
) -> ApiResult<Order> {
    let note = note.trim();
    if note.chars().count() > MAX_NOTE_LEN {
        return Err(ApiError::BadRequest(format!("Note exceeds {} characters", MAX_NOTE_LEN)));
    }

    let order = db::orders::load_order(&state.db, order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", order_id)))?;

    let participant = order
        .participant(caller.id(), caller.is_admin())
        .ok_or_else(|| ApiError::Forbidden("Not a participant of this order".to_string()))?;

    let from = order.status;
    let actors = transition_actors(from, to).ok_or_else(|| {
        ApiError::Conflict(format!("Cannot move order from {} to {}", from, to))
    })?;
    if !actors.contains(&participant) {
        return Err(ApiError::Forbidden(format!(
            "{:?} may not move order from {} to {}",
            participant, from, to
        )));
    }

    let now = Utc::now();
    let mut escrow_event = None;
    let mut payout_event = None;

    match (from, to) {
        (OrderStatus::Open, OrderStatus::Cancelled) => {
            // Claim order and escrow before any money moves
            let mut tx = state.db.begin().await?;
            if !db::orders::update_order_status(&mut *tx, order.id, from, to, now).await? {
                return Err(ApiError::Conflict("Order changed concurrently".to_string()));
            }
            let payment = db::payments::load_for_order(&mut *tx, order.id)
                .await?
                .filter(|p| p.status == PaymentStatus::Captured && p.escrow_status == EscrowStatus::Held)
                .ok_or_else(|| {
                    ApiError::Internal(format!("Open order {} has no held payment", order.id))
                })?;
            let gateway_payment_id = payment.gateway_payment_id.clone().ok_or_else(|| {
                ApiError::Internal(format!("Captured payment {} has no gateway id", payment.id))
            })?;
            db::payments::begin_refund(&mut *tx, payment.id, now).await?;
            tx.commit().await?;

            let refund = match state
                .gateway
                .refund_payment(&gateway_payment_id, payment.amount_paise)
                .await
            {
                Ok(refund) => refund,
                Err(e) => {
                    // Hand the order back as it was
                    let reverted_at = Utc::now();
                    let mut tx = state.db.begin().await?;
                    db::orders::update_order_status(&mut *tx, order.id, to, from, reverted_at).await?;
                    db::payments::abort_refund(&mut *tx, payment.id, reverted_at).await?;
                    tx.commit().await?;
                    warn!(order_id = %order.id, error = %e, "Refund refused, order left open");
                    return Err(e.into());
                }
            };

            let mut tx = state.db.begin().await?;
            if !db::payments::mark_refunded(&mut *tx, payment.id, &refund.id, now).await? {
                info!(payment_id = %payment.id, "Refund already recorded by webhook");
            }
            db::slots::release_slot(&mut *tx, order.slot_id, order.id, now).await?;
            db::orders::insert_status_change(&mut *tx, order.id, Some(from), to, Some(caller.id()), note, now)
                .await?;
            tx.commit().await?;

            info!(order_id = %order.id, refund_id = %refund.id, "Paid order cancelled and refunded");
        }
        (OrderStatus::PendingPayment, OrderStatus::Cancelled) => {
            let mut tx = state.db.begin().await?;
            if !db::orders::update_order_status(&mut *tx, order.id, from, to, now).await? {
                return Err(ApiError::Conflict("Order changed concurrently".to_string()));
            }
            if let Some(payment) = db::payments::load_for_order(&mut *tx, order.id).await? {
                db::payments::close_uncaptured(&mut *tx, payment.id, PaymentStatus::Cancelled, None, now)
                    .await?;
            }
            db::slots::release_slot(&mut *tx, order.slot_id, order.id, now).await?;
            db::orders::insert_status_change(&mut *tx, order.id, Some(from), to, Some(caller.id()), note, now)
                .await?;
            tx.commit().await?;
        }
        (OrderStatus::Resolved, OrderStatus::Closed) => {
            let mut tx = state.db.begin().await?;
            if !db::orders::update_order_status(&mut *tx, order.id, from, to, now).await? {
                return Err(ApiError::Conflict("Order changed concurrently".to_string()));
            }
            let payment = db::payments::load_for_order(&mut *tx, order.id)
                .await?
                .ok_or_else(|| ApiError::Internal(format!("Order {} has no payment", order.id)))?;
            if !db::payments::release_escrow(&mut *tx, payment.id, now).await? {
                return Err(ApiError::Conflict(format!(
                    "Payment {} has no escrow to release",
                    payment.id
                )));
            }
            let payout = Payout {
                id: Uuid::new_v4(),
                order_id: order.id,
                consultant_id: order.consultant_id,
                amount_paise: order.consultant_payout_paise,
                status: PayoutStatus::Pending,
                gateway_payout_id: None,
                failure_reason: None,
                created_at: now,
                updated_at: now,
            };
            db::payouts::insert_payout(&mut *tx, &payout).await?;
            db::orders::insert_status_change(&mut *tx, order.id, Some(from), to, Some(caller.id()), note, now)
                .await?;
            tx.commit().await?;

            info!(order_id = %order.id, payout_id = %payout.id, amount_paise = payout.amount_paise, "Escrow released, payout queued");

            escrow_event = Some(PulseEvent::EscrowReleased {
                order_id: order.id,
                customer_id: order.customer_id,
                consultant_id: order.consultant_id,
                amount_paise: payment.amount_paise,
                timestamp: now,
            });
            payout_event = Some(PulseEvent::PayoutCreated {
                payout_id: payout.id,
                order_id: order.id,
                consultant_id: order.consultant_id,
                amount_paise: payout.amount_paise,
                timestamp: now,
            });
        }
        _ => {
            let mut tx = state.db.begin().await?;
            if !db::orders::update_order_status(&mut *tx, order.id, from, to, now).await? {
                return Err(ApiError::Conflict("Order changed concurrently".to_string()));
            }
            db::orders::insert_status_change(&mut *tx, order.id, Some(from), to, Some(caller.id()), note, now)
                .await?;
            tx.commit().await?;
        }
    }

    info!(order_id = %order.id, from = %from, to = %to, by = %caller.id(), "Order status changed");

    state.event_bus.emit_lossy(PulseEvent::OrderStatusChanged {
        order_id: order.id,
        customer_id: order.customer_id,
        consultant_id: order.consultant_id,
        old_status: from.to_string(),
        new_status: to.to_string(),
        timestamp: now,
    });
    for event in [escrow_event, payout_event].into_iter().flatten() {
        state.event_bus.emit_lossy(event);
    }

    db::orders::load_order(&state.db, order.id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Order {} vanished", order.id)))
}
