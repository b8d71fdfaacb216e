//! Payment capture, failure and refund bookkeeping
//!
//! Both the checkout callback (`/api/payments/verify`) and the gateway
//! webhook funnel into `capture_payment`, which is idempotent: the payment
//! row only leaves `created` once.

use chrono::Utc;
use pulse_common::api::{verify_payment_signature, SignatureError};
use pulse_common::events::PulseEvent;
use tracing::{error, info, warn};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, EscrowStatus, Order, OrderStatus, Payment, PaymentStatus};
use crate::AppState;

/// Result of a capture attempt
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    /// Funds now held in escrow, order open
    Captured(Payment),
    /// Capture was already recorded
    AlreadyCaptured(Payment),
    /// Order had expired or been cancelled; payment refunded (or refund pending)
    LateCapture(Payment),
}

impl CaptureOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            CaptureOutcome::Captured(p)
            | CaptureOutcome::AlreadyCaptured(p)
            | CaptureOutcome::LateCapture(p) => p,
        }
    }
}

/// Verify the checkout callback signature, then capture
///
/// A bad signature is rejected without touching any state.
pub async fn verify_checkout(
    state: &AppState,
    caller: &AuthUser,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> ApiResult<CaptureOutcome> {
    let payment = db::payments::load_by_gateway_order(&state.db, gateway_order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment for {} not found", gateway_order_id)))?;
    let order = load_order(state, &payment).await?;
    if order.customer_id != caller.id() && !caller.is_admin() {
        return Err(ApiError::Forbidden("Order belongs to another customer".to_string()));
    }

    match verify_payment_signature(
        gateway_order_id,
        gateway_payment_id,
        signature,
        &state.config.razorpay.key_secret,
    ) {
        Ok(()) => {}
        Err(SignatureError::MissingSecret) => {
            return Err(ApiError::Internal(
                "Razorpay key secret not configured".to_string(),
            ))
        }
        Err(e) => {
            warn!(order_id = %order.id, gateway_order_id, error = %e, "Rejected checkout callback");
            return Err(ApiError::BadRequest(format!("Invalid payment signature: {}", e)));
        }
    }

    capture_payment(state, gateway_order_id, gateway_payment_id).await
}

async fn load_order(state: &AppState, payment: &Payment) -> ApiResult<Order> {
    db::orders::load_order(&state.db, payment.order_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Payment {} has no order", payment.id)))
}

async fn reload_payment(state: &AppState, gateway_order_id: &str) -> ApiResult<Payment> {
    db::payments::load_by_gateway_order(&state.db, gateway_order_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Payment for {} vanished", gateway_order_id)))
}

/// Record a gateway capture for `gateway_order_id`
pub async fn capture_payment(
    state: &AppState,
    gateway_order_id: &str,
    gateway_payment_id: &str,
) -> ApiResult<CaptureOutcome> {
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let payment = db::payments::load_by_gateway_order(&mut *tx, gateway_order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment for {} not found", gateway_order_id)))?;

    let order = db::orders::load_order(&mut *tx, payment.order_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Payment {} has no order", payment.id)))?;

    if matches!(payment.status, PaymentStatus::Captured | PaymentStatus::Refunded) {
        if payment.gateway_payment_id.as_deref() != Some(gateway_payment_id) {
            warn!(
                payment_id = %payment.id,
                gateway_payment_id,
                "Second capture reported for an already captured order"
            );
        }
        // The order may have lapsed before this capture was first recorded
        if order.status == OrderStatus::Cancelled {
            return Ok(CaptureOutcome::LateCapture(payment));
        }
        return Ok(CaptureOutcome::AlreadyCaptured(payment));
    }

    if payment.status == PaymentStatus::Created && order.status == OrderStatus::PendingPayment {
        db::payments::mark_captured(&mut *tx, payment.id, gateway_payment_id, EscrowStatus::Held, now)
            .await?;
        if !db::slots::book_slot(&mut *tx, order.slot_id, order.id).await? {
            return Err(ApiError::Internal(format!(
                "Slot {} is not held by order {}",
                order.slot_id, order.id
            )));
        }
        db::orders::update_order_status(
            &mut *tx,
            order.id,
            OrderStatus::PendingPayment,
            OrderStatus::Open,
            now,
        )
        .await?;
        db::orders::insert_status_change(
            &mut *tx,
            order.id,
            Some(OrderStatus::PendingPayment),
            OrderStatus::Open,
            None,
            "Payment captured",
            now,
        )
        .await?;
        tx.commit().await?;

        info!(order_id = %order.id, gateway_payment_id, amount_paise = payment.amount_paise, "Payment captured into escrow");

        state.event_bus.emit_lossy(PulseEvent::PaymentCaptured {
            order_id: order.id,
            payment_id: payment.id,
            customer_id: order.customer_id,
            consultant_id: order.consultant_id,
            amount_paise: payment.amount_paise,
            timestamp: now,
        });
        state.event_bus.emit_lossy(PulseEvent::OrderStatusChanged {
            order_id: order.id,
            customer_id: order.customer_id,
            consultant_id: order.consultant_id,
            old_status: OrderStatus::PendingPayment.to_string(),
            new_status: OrderStatus::Open.to_string(),
            timestamp: now,
        });

        return Ok(CaptureOutcome::Captured(
            reload_payment(state, gateway_order_id).await?,
        ));
    }

    // Money arrived for an order that no longer wants it
    db::payments::record_late_capture(&mut *tx, payment.id, gateway_payment_id, now).await?;
    tx.commit().await?;
    warn!(
        order_id = %order.id,
        order_status = %order.status,
        gateway_payment_id,
        "Late capture for inactive order, refunding"
    );

    match state
        .gateway
        .refund_payment(gateway_payment_id, payment.amount_paise)
        .await
    {
        Ok(refund) => {
            db::payments::mark_refunded(&state.db, payment.id, &refund.id, Utc::now()).await?;
        }
        Err(e) => {
            error!(payment_id = %payment.id, error = %e, "Refund of late capture failed; needs manual follow-up");
        }
    }

    Ok(CaptureOutcome::LateCapture(
        reload_payment(state, gateway_order_id).await?,
    ))
}

/// Gateway reported a failed payment: close it and cancel the pending order
pub async fn fail_payment(state: &AppState, gateway_order_id: &str, reason: &str) -> ApiResult<()> {
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let payment = match db::payments::load_by_gateway_order(&mut *tx, gateway_order_id).await? {
        Some(payment) => payment,
        None => {
            warn!(gateway_order_id, "Failure reported for unknown gateway order");
            return Ok(());
        }
    };
    if payment.status != PaymentStatus::Created {
        info!(payment_id = %payment.id, status = %payment.status, "Ignoring failure for settled payment");
        return Ok(());
    }

    let order = db::orders::load_order(&mut *tx, payment.order_id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Payment {} has no order", payment.id)))?;

    db::payments::close_uncaptured(&mut *tx, payment.id, PaymentStatus::Failed, Some(reason), now)
        .await?;

    let cancelled = db::orders::update_order_status(
        &mut *tx,
        order.id,
        OrderStatus::PendingPayment,
        OrderStatus::Cancelled,
        now,
    )
    .await?;
    if cancelled {
        db::slots::release_slot(&mut *tx, order.slot_id, order.id, now).await?;
        db::orders::insert_status_change(
            &mut *tx,
            order.id,
            Some(OrderStatus::PendingPayment),
            OrderStatus::Cancelled,
            None,
            &format!("Payment failed: {}", reason),
            now,
        )
        .await?;
    }
    tx.commit().await?;

    warn!(order_id = %order.id, reason, "Payment failed");

    state.event_bus.emit_lossy(PulseEvent::PaymentFailed {
        order_id: order.id,
        customer_id: order.customer_id,
        consultant_id: order.consultant_id,
        reason: reason.to_string(),
        timestamp: now,
    });
    if cancelled {
        state.event_bus.emit_lossy(PulseEvent::OrderStatusChanged {
            order_id: order.id,
            customer_id: order.customer_id,
            consultant_id: order.consultant_id,
            old_status: OrderStatus::PendingPayment.to_string(),
            new_status: OrderStatus::Cancelled.to_string(),
            timestamp: now,
        });
    }

    Ok(())
}

/// Gateway confirmed a refund
pub async fn record_refund(
    state: &AppState,
    gateway_payment_id: &str,
    refund_id: &str,
) -> ApiResult<()> {
    let payment = match db::payments::load_by_gateway_payment(&state.db, gateway_payment_id).await? {
        Some(payment) => payment,
        None => {
            warn!(gateway_payment_id, "Refund reported for unknown payment");
            return Ok(());
        }
    };

    match payment.status {
        PaymentStatus::Refunded => Ok(()),
        PaymentStatus::Captured if payment.escrow_status != EscrowStatus::Released => {
            db::payments::mark_refunded(&state.db, payment.id, refund_id, Utc::now()).await?;
            info!(payment_id = %payment.id, refund_id, "Refund recorded");
            Ok(())
        }
        _ => {
            warn!(
                payment_id = %payment.id,
                status = %payment.status,
                escrow = %payment.escrow_status,
                "Refund reported for payment that cannot be refunded locally"
            );
            Ok(())
        }
    }
}
