//! Customer choices and order booking
//!
//! Booking runs in two phases. A local transaction holds the slot, prices the
//! order and records it as `PendingPayment`. The gateway order is created
//! after commit; if that call fails a compensating transaction cancels the
//! order and hands the slot back.

use chrono::{Duration, Utc};
use pulse_common::events::PulseEvent;
use pulse_common::money::{slot_amount, FeeSplit, CURRENCY};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    ChoiceStatus, Conversation, CustomerChoice, EscrowStatus, Order, OrderStatus, Payment,
    PaymentStatus, Priority, SlotStatus,
};
use crate::services::gateway::CreateOrderRequest;
use crate::AppState;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

/// Record a customer's service type / consultant / slot selection
pub async fn create_choice(
    pool: &SqlitePool,
    customer_id: Uuid,
    service_type_id: Uuid,
    consultant_id: Uuid,
    slot_id: Uuid,
) -> ApiResult<CustomerChoice> {
    let service_type = db::taxonomy::load_service_type(pool, service_type_id)
        .await?
        .filter(|st| st.active)
        .ok_or_else(|| ApiError::NotFound(format!("Service type {} not found", service_type_id)))?;

    db::consultants::load_profile(pool, consultant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Consultant {} not found", consultant_id)))?;

    let slot = db::slots::load_slot(pool, slot_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Slot {} not found", slot_id)))?;
    if slot.consultant_id != consultant_id {
        return Err(ApiError::BadRequest(
            "Slot does not belong to the selected consultant".to_string(),
        ));
    }
    if slot.status != SlotStatus::Open || slot.starts_at <= Utc::now() {
        return Err(ApiError::Conflict("Slot is no longer available".to_string()));
    }

    let choice = CustomerChoice {
        id: Uuid::new_v4(),
        customer_id,
        service_type_id: service_type.id,
        consultant_id,
        slot_id,
        status: ChoiceStatus::Pending,
        created_at: Utc::now(),
    };
    db::choices::insert_choice(pool, &choice).await?;

    info!(choice_id = %choice.id, customer_id = %customer_id, slot_id = %slot_id, "Recorded customer choice");
    Ok(choice)
}

/// Ticket details supplied at booking
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub choice_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub module_code: Option<String>,
}

/// Booked order plus what the checkout widget needs
#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub order: Order,
    pub payment: Payment,
}

/// Turn a pending choice into a `PendingPayment` order with a gateway order
pub async fn book_order(
    state: &AppState,
    customer_id: Uuid,
    request: BookingRequest,
) -> ApiResult<BookingOutcome> {
    let title = request.title.trim().to_string();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(ApiError::BadRequest(format!(
            "Title must be 1..={} characters",
            MAX_TITLE_LEN
        )));
    }
    if request.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ApiError::BadRequest(format!(
            "Description exceeds {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    let module_code = request
        .module_code
        .as_deref()
        .map(|code| code.trim().to_uppercase())
        .filter(|code| !code.is_empty());

    let fees = state.config.fees;
    let hold_minutes = state.config.booking.hold_minutes;

    // Phase 1: hold the slot and record the order
    let mut tx = state.db.begin().await?;

    let choice = db::choices::load_choice(&mut *tx, request.choice_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Choice {} not found", request.choice_id)))?;
    if choice.customer_id != customer_id {
        return Err(ApiError::Forbidden("Choice belongs to another customer".to_string()));
    }
    if choice.status != ChoiceStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "Choice is already {}",
            choice.status
        )));
    }

    if let Some(code) = module_code.as_deref() {
        let known = db::taxonomy::load_module_by_code(&mut *tx, code)
            .await?
            .is_some_and(|m| m.active);
        if !known {
            return Err(ApiError::BadRequest(format!("Unknown SAP module '{}'", code)));
        }
    }

    let slot = db::slots::load_slot(&mut *tx, choice.slot_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Slot {} not found", choice.slot_id)))?;
    let now = Utc::now();
    if slot.starts_at <= now {
        return Err(ApiError::Conflict("Slot has already started".to_string()));
    }

    let profile = db::consultants::load_profile(&mut *tx, choice.consultant_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Consultant {} not found", choice.consultant_id))
        })?;
    if profile.hourly_rate_paise <= 0 {
        return Err(ApiError::Unprocessable(
            "Consultant has not set an hourly rate".to_string(),
        ));
    }

    let amount = slot_amount(profile.hourly_rate_paise, slot.duration_minutes())?;
    let split = FeeSplit::compute(amount, fees.platform_fee_bps, fees.gateway_fee_bps)?;

    let order_id = Uuid::new_v4();
    let held_until = now + Duration::minutes(hold_minutes);
    if !db::slots::hold_slot(&mut *tx, slot.id, order_id, held_until).await? {
        return Err(ApiError::Conflict("Slot is no longer available".to_string()));
    }

    let order = Order {
        id: order_id,
        customer_id,
        consultant_id: choice.consultant_id,
        slot_id: slot.id,
        service_type_id: choice.service_type_id,
        module_code,
        title,
        description: request.description,
        priority: request.priority,
        status: OrderStatus::PendingPayment,
        amount_paise: split.amount,
        platform_fee_paise: split.platform_fee,
        gateway_fee_paise: split.gateway_fee,
        consultant_payout_paise: split.consultant_payout,
        created_at: now,
        updated_at: now,
    };
    db::orders::insert_order(&mut *tx, &order).await?;
    db::orders::insert_status_change(
        &mut *tx,
        order.id,
        None,
        OrderStatus::PendingPayment,
        Some(customer_id),
        "Order booked",
        now,
    )
    .await?;
    db::choices::update_choice_status(
        &mut *tx,
        choice.id,
        ChoiceStatus::Pending,
        ChoiceStatus::Converted,
    )
    .await?;
    db::messages::insert_conversation(
        &mut *tx,
        &Conversation {
            id: Uuid::new_v4(),
            order_id: order.id,
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    info!(
        order_id = %order.id,
        slot_id = %slot.id,
        amount_paise = order.amount_paise,
        held_until = %held_until,
        "Order booked, slot held"
    );

    // Phase 2: gateway order
    let mut notes = HashMap::new();
    notes.insert("order_id".to_string(), order.id.to_string());
    notes.insert("consultant_id".to_string(), order.consultant_id.to_string());
    let gateway_request = CreateOrderRequest {
        amount: order.amount_paise,
        currency: CURRENCY.to_string(),
        receipt: order.id.to_string(),
        notes,
    };

    let gateway_order = match state.gateway.create_order(&gateway_request).await {
        Ok(gateway_order) => gateway_order,
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "Gateway order failed, rolling back booking");
            if let Err(comp_err) = abandon_booking(&state.db, &order, choice.id).await {
                error!(order_id = %order.id, error = %comp_err, "Compensation for failed booking did not complete");
            }
            return Err(e.into());
        }
    };

    let payment = Payment {
        id: Uuid::new_v4(),
        order_id: order.id,
        gateway_order_id: gateway_order.id,
        gateway_payment_id: None,
        amount_paise: order.amount_paise,
        currency: CURRENCY.to_string(),
        status: PaymentStatus::Created,
        escrow_status: EscrowStatus::None,
        refund_id: None,
        failure_reason: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    db::payments::insert_payment(&state.db, &payment).await?;

    state.event_bus.emit_lossy(PulseEvent::OrderCreated {
        order_id: order.id,
        customer_id: order.customer_id,
        consultant_id: order.consultant_id,
        amount_paise: order.amount_paise,
        timestamp: Utc::now(),
    });

    info!(order_id = %order.id, gateway_order_id = %payment.gateway_order_id, "Awaiting payment");
    Ok(BookingOutcome { order, payment })
}

/// Compensating transaction after a failed gateway call
///
/// Cancels the order, hands the slot back and reopens the choice so the
/// customer can retry.
async fn abandon_booking(pool: &SqlitePool, order: &Order, choice_id: Uuid) -> ApiResult<()> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    db::orders::update_order_status(
        &mut *tx,
        order.id,
        OrderStatus::PendingPayment,
        OrderStatus::Cancelled,
        now,
    )
    .await?;
    db::orders::insert_status_change(
        &mut *tx,
        order.id,
        Some(OrderStatus::PendingPayment),
        OrderStatus::Cancelled,
        None,
        "Payment gateway order creation failed",
        now,
    )
    .await?;
    db::slots::release_slot(&mut *tx, order.slot_id, order.id, now).await?;
    db::choices::update_choice_status(
        &mut *tx,
        choice_id,
        ChoiceStatus::Converted,
        ChoiceStatus::Pending,
    )
    .await?;

    tx.commit().await?;
    info!(order_id = %order.id, "Booking rolled back");
    Ok(())
}
