//! Razorpay webhook receiver
//!
//! The body is verified against `X-Razorpay-Signature` before it is parsed.
//! Each delivery is keyed by `X-Razorpay-Event-Id` (or a digest of the body
//! when the header is absent) and applied at most once.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use pulse_common::api::{verify_webhook_signature, SignatureError};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::services::payment_flow;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-razorpay-signature";
const EVENT_ID_HEADER: &str = "x-razorpay-event-id";

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<EntityWrapper<PaymentEntity>>,
    refund: Option<EntityWrapper<RefundEntity>>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper<T> {
    entity: T,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundEntity {
    id: String,
    payment_id: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn event_id(headers: &HeaderMap, body: &[u8]) -> String {
    match header_str(headers, EVENT_ID_HEADER) {
        Some(id) => id.to_string(),
        None => format!("sha256:{}", hex::encode(Sha256::digest(body))),
    }
}

fn payment_entity(envelope: &WebhookEnvelope) -> ApiResult<&PaymentEntity> {
    envelope
        .payload
        .payment
        .as_ref()
        .map(|wrapper| &wrapper.entity)
        .ok_or_else(|| ApiError::BadRequest(format!("{} without payment entity", envelope.event)))
}

/// Apply one verified event
async fn dispatch(state: &AppState, envelope: &WebhookEnvelope) -> ApiResult<()> {
    match envelope.event.as_str() {
        "payment.captured" | "order.paid" => {
            let payment = payment_entity(envelope)?;
            let Some(order_id) = payment.order_id.as_deref() else {
                warn!(payment_id = %payment.id, "Captured payment without order id");
                return Ok(());
            };
            match payment_flow::capture_payment(state, order_id, &payment.id).await {
                Ok(outcome) => {
                    debug!(payment_id = %outcome.payment().id, "Webhook capture applied");
                    Ok(())
                }
                Err(ApiError::NotFound(msg)) => {
                    warn!(gateway_order_id = order_id, "Capture for unknown order: {}", msg);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        "payment.failed" => {
            let payment = payment_entity(envelope)?;
            let Some(order_id) = payment.order_id.as_deref() else {
                warn!(payment_id = %payment.id, "Failed payment without order id");
                return Ok(());
            };
            let reason = payment
                .error_description
                .as_deref()
                .unwrap_or("Payment failed at gateway");
            payment_flow::fail_payment(state, order_id, reason).await
        }
        "refund.processed" => {
            let refund = envelope
                .payload
                .refund
                .as_ref()
                .map(|wrapper| &wrapper.entity)
                .ok_or_else(|| ApiError::BadRequest("refund.processed without refund entity".to_string()))?;
            payment_flow::record_refund(state, &refund.payment_id, &refund.id).await
        }
        other => {
            debug!(event = other, "Ignoring webhook event");
            Ok(())
        }
    }
}

/// POST /api/webhooks/razorpay
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = header_str(&headers, SIGNATURE_HEADER)
        .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".to_string()))?;

    match verify_webhook_signature(&body, signature, &state.config.razorpay.webhook_secret) {
        Ok(()) => {}
        Err(SignatureError::MissingSecret) => {
            return Err(ApiError::Internal("Webhook secret not configured".to_string()));
        }
        Err(e) => {
            warn!("Rejected webhook: {}", e);
            return Err(ApiError::BadRequest(e.to_string()));
        }
    }

    let event_id = event_id(&headers, &body);
    if db::webhook_events::event_seen(&state.db, &event_id).await? {
        debug!(event_id = %event_id, "Duplicate webhook delivery");
        return Ok(Json(json!({ "status": "duplicate" })));
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

    dispatch(&state, &envelope).await?;

    if db::webhook_events::record_event(&state.db, &event_id, &envelope.event, Utc::now()).await? {
        info!(event_id = %event_id, event = %envelope.event, "Webhook processed");
    }

    Ok(Json(json!({ "status": "processed" })))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/api/webhooks/razorpay", post(razorpay_webhook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_event_id_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_ID_HEADER, HeaderValue::from_static("evt_123"));
        assert_eq!(event_id(&headers, b"{}"), "evt_123");
    }

    #[test]
    fn test_event_id_falls_back_to_body_digest() {
        let headers = HeaderMap::new();
        let a = event_id(&headers, b"{\"event\":\"payment.captured\"}");
        let b = event_id(&headers, b"{\"event\":\"payment.captured\"}");
        let c = event_id(&headers, b"{\"event\":\"payment.failed\"}");
        assert!(a.starts_with("sha256:"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_envelope_parses_razorpay_shape() {
        let body = r#"{
            "entity": "event",
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_1", "order_id": "order_1", "amount": 100}}}
        }"#;
        let envelope: WebhookEnvelope = serde_json::from_str(body).unwrap();
        let payment = payment_entity(&envelope).unwrap();
        assert_eq!(payment.id, "pay_1");
        assert_eq!(payment.order_id.as_deref(), Some("order_1"));
    }

    #[test]
    fn test_envelope_without_payload_is_accepted() {
        let envelope: WebhookEnvelope =
            serde_json::from_str(r#"{"event": "payout.processed"}"#).unwrap();
        assert!(envelope.payload.payment.is_none());
        assert!(payment_entity(&envelope).is_err());
    }
}
