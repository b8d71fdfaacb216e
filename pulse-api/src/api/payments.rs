//! Checkout verification and payment lookup

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::orders::load_visible_order;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, Payment};
use crate::services::payment_flow::{self, CaptureOutcome};
use crate::AppState;

/// Razorpay checkout handler fields
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    #[serde(alias = "razorpay_order_id")]
    pub gateway_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub gateway_payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub payment: Payment,
    /// True when this call recorded the capture
    pub newly_captured: bool,
}

/// POST /api/payments/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<VerifyPaymentRequest>,
) -> ApiResult<Json<VerifyPaymentResponse>> {
    let outcome = payment_flow::verify_checkout(
        &state,
        &auth,
        req.gateway_order_id.trim(),
        req.gateway_payment_id.trim(),
        &req.signature,
    )
    .await?;

    match outcome {
        CaptureOutcome::Captured(payment) => Ok(Json(VerifyPaymentResponse {
            payment,
            newly_captured: true,
        })),
        CaptureOutcome::AlreadyCaptured(payment) => Ok(Json(VerifyPaymentResponse {
            payment,
            newly_captured: false,
        })),
        CaptureOutcome::LateCapture(payment) => Err(ApiError::Conflict(format!(
            "Order {} is no longer awaiting payment; payment {} is being refunded",
            payment.order_id, payment.id
        ))),
    }
}

/// GET /api/orders/:id/payment
pub async fn get_order_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    let order = load_visible_order(&state, &auth, id).await?;
    db::payments::load_for_order(&state.db, order.id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No payment for order {}", order.id)))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/verify", post(verify_payment))
        .route("/api/orders/:id/payment", get(get_order_payment))
}
