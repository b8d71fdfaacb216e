//! End-to-end booking, payment, ticket workflow and payout scenarios
//!
//! Every test drives the router with a `FakeGateway` standing in for Razorpay.

mod helpers;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use helpers::{
    book, book_and_pay, checkout_signature, choose_slot, move_order, seed_marketplace,
    slot_window, uuid_of, GatewayCall, TestApp, HOURLY_RATE,
};
use pulse_api::services::hold_sweeper::sweep_expired_holds;
use pulse_common::db::format_ts;
use pulse_common::events::PulseEvent;
use serde_json::json;
use uuid::Uuid;

async fn order_json(t: &TestApp, token: &str, order_id: Uuid) -> serde_json::Value {
    let (status, order) = t.get(&format!("/api/orders/{}", order_id), Some(token)).await;
    assert_eq!(status, StatusCode::OK, "{}", order);
    order
}

async fn payment_json(t: &TestApp, token: &str, order_id: Uuid) -> serde_json::Value {
    let (status, payment) = t
        .get(&format!("/api/orders/{}/payment", order_id), Some(token))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", payment);
    payment
}

async fn slot_status(t: &TestApp, slot_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM availability_slots WHERE id = ?")
        .bind(slot_id.to_string())
        .fetch_one(&t.state.db)
        .await
        .unwrap()
}

// ========================================
// Booking
// ========================================

#[tokio::test]
async fn test_booking_holds_slot_and_prices_order() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;

    let booked = book(&t, &m).await;

    let order = &booked["order"];
    assert_eq!(order["status"], "pending_payment");
    assert_eq!(order["module_code"], "BASIS");
    assert_eq!(order["priority"], "high");
    assert_eq!(order["amount_paise"], HOURLY_RATE);
    // 20% platform, 2% gateway
    assert_eq!(order["platform_fee_paise"], 40_000);
    assert_eq!(order["gateway_fee_paise"], 4_000);
    assert_eq!(order["consultant_payout_paise"], 156_000);

    assert_eq!(booked["key_id"], helpers::KEY_ID);
    assert_eq!(booked["currency"], "INR");
    assert_eq!(booked["amount_paise"], HOURLY_RATE);
    assert!(booked["gateway_order_id"].as_str().unwrap().starts_with("order_"));

    assert_eq!(slot_status(&t, m.slot_id).await, "held");

    let order_id = uuid_of(&order["id"]);
    assert_eq!(
        t.gateway.calls(),
        vec![GatewayCall::CreateOrder {
            receipt: order_id.to_string(),
            amount: HOURLY_RATE,
        }]
    );

    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["status"], "created");
    assert_eq!(payment["escrow_status"], "none");
}

#[tokio::test]
async fn test_held_slot_cannot_be_chosen_again() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    book(&t, &m).await;

    let (_, other) = t.register_and_login("second@customer.test", "customer").await;
    let (status, _) = t
        .post(
            "/api/choices",
            Some(&other),
            json!({
                "service_type_id": m.service_type_id,
                "consultant_id": m.consultant_id,
                "slot_id": m.slot_id,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_choice_converts_once() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let choice_id = choose_slot(&t, &m).await;

    let request = json!({ "choice_id": choice_id, "title": "Short dump in SM21" });
    let (status, _) = t.post("/api/orders", Some(&m.customer_token), request.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = t.post("/api/orders", Some(&m.customer_token), request).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_booking_validates_title_and_owner() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let choice_id = choose_slot(&t, &m).await;

    let (status, _) = t
        .post(
            "/api/orders",
            Some(&m.customer_token),
            json!({ "choice_id": choice_id, "title": "   " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, other) = t.register_and_login("thief@customer.test", "customer").await;
    let (status, _) = t
        .post(
            "/api/orders",
            Some(&other),
            json!({ "choice_id": choice_id, "title": "Not mine" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .post(
            "/api/orders",
            Some(&m.consultant_token),
            json!({ "choice_id": choice_id, "title": "Consultants cannot book" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_gateway_failure_rolls_back_booking() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let choice_id = choose_slot(&t, &m).await;

    t.gateway.set_failing(true);
    let (status, body) = t
        .post(
            "/api/orders",
            Some(&m.customer_token),
            json!({ "choice_id": choice_id, "title": "Gateway down" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{}", body);
    assert_eq!(body["error"]["code"], "GATEWAY_ERROR");

    assert_eq!(slot_status(&t, m.slot_id).await, "open");
    let (_, choice) = t
        .get(&format!("/api/choices/{}", choice_id), Some(&m.customer_token))
        .await;
    assert_eq!(choice["status"], "pending");

    let (_, orders) = t.get("/api/orders?status=cancelled", Some(&m.customer_token)).await;
    assert_eq!(orders["orders"].as_array().unwrap().len(), 1);

    // The same choice can be retried once the gateway recovers
    t.gateway.set_failing(false);
    let (status, retry) = t
        .post(
            "/api/orders",
            Some(&m.customer_token),
            json!({ "choice_id": choice_id, "title": "Gateway back" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", retry);
    assert_eq!(slot_status(&t, m.slot_id).await, "held");
}

// ========================================
// Checkout verification and webhooks
// ========================================

#[tokio::test]
async fn test_verify_captures_into_escrow() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;

    let (order_id, gateway_payment_id) = book_and_pay(&t, &m).await;

    let order = order_json(&t, &m.customer_token, order_id).await;
    assert_eq!(order["status"], "open");
    assert_eq!(slot_status(&t, m.slot_id).await, "booked");

    let payment = payment_json(&t, &m.consultant_token, order_id).await;
    assert_eq!(payment["status"], "captured");
    assert_eq!(payment["escrow_status"], "held");
    assert_eq!(payment["gateway_payment_id"], gateway_payment_id.as_str());
}

#[tokio::test]
async fn test_verify_is_idempotent() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let gateway_order_id = booked["gateway_order_id"].as_str().unwrap();

    let request = json!({
        "gateway_order_id": gateway_order_id,
        "gateway_payment_id": "pay_repeat",
        "signature": checkout_signature(gateway_order_id, "pay_repeat"),
    });

    let (status, first) = t
        .post("/api/payments/verify", Some(&m.customer_token), request.clone())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["newly_captured"], true);

    let (status, second) = t
        .post("/api/payments/verify", Some(&m.customer_token), request)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["newly_captured"], false);
    assert_eq!(second["payment"]["id"], first["payment"]["id"]);

    let order_id = uuid_of(&booked["order"]["id"]);
    let (_, history) = t
        .get(&format!("/api/orders/{}/history", order_id), Some(&m.customer_token))
        .await;
    let to_open = history
        .as_array()
        .unwrap()
        .iter()
        .filter(|h| h["to_status"] == "open")
        .count();
    assert_eq!(to_open, 1);
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let order_id = uuid_of(&booked["order"]["id"]);

    let (status, _) = t
        .post(
            "/api/payments/verify",
            Some(&m.customer_token),
            json!({
                "gateway_order_id": booked["gateway_order_id"],
                "gateway_payment_id": "pay_forged",
                "signature": checkout_signature("order_other", "pay_forged"),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .post(
            "/api/payments/verify",
            Some(&m.customer_token),
            json!({
                "gateway_order_id": booked["gateway_order_id"],
                "gateway_payment_id": "pay_forged",
                "signature": "not-hex",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let order = order_json(&t, &m.customer_token, order_id).await;
    assert_eq!(order["status"], "pending_payment");
    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["status"], "created");
}

#[tokio::test]
async fn test_verify_by_other_customer_forbidden() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let gateway_order_id = booked["gateway_order_id"].as_str().unwrap();
    let (_, other) = t.register_and_login("other@customer.test", "customer").await;

    let (status, _) = t
        .post(
            "/api/payments/verify",
            Some(&other),
            json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_x",
                "signature": checkout_signature(gateway_order_id, "pay_x"),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

fn captured_event(gateway_order_id: &str, gateway_payment_id: &str) -> serde_json::Value {
    json!({
        "entity": "event",
        "event": "payment.captured",
        "payload": {
            "payment": {
                "entity": {
                    "id": gateway_payment_id,
                    "order_id": gateway_order_id,
                    "amount": HOURLY_RATE,
                    "currency": "INR",
                    "status": "captured"
                }
            }
        }
    })
}

#[tokio::test]
async fn test_webhook_capture_and_dedupe() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let order_id = uuid_of(&booked["order"]["id"]);
    let event = captured_event(booked["gateway_order_id"].as_str().unwrap(), "pay_hook");

    let (status, body) = t.webhook(&event, Some("evt_capture_1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    assert_eq!(order_json(&t, &m.customer_token, order_id).await["status"], "open");

    let (status, body) = t.webhook(&event, Some("evt_capture_1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    // A redelivery under a new id is still a no-op for the order
    let (status, body) = t.webhook(&event, Some("evt_capture_2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["gateway_payment_id"], "pay_hook");
}

#[tokio::test]
async fn test_webhook_then_verify_agree() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let gateway_order_id = booked["gateway_order_id"].as_str().unwrap();

    t.webhook(&captured_event(gateway_order_id, "pay_both"), None).await;

    let (status, verified) = t
        .post(
            "/api/payments/verify",
            Some(&m.customer_token),
            json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_both",
                "signature": checkout_signature(gateway_order_id, "pay_both"),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["newly_captured"], false);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let t = TestApp::new().await;

    let response = {
        use axum::body::Body;
        use axum::http::Request;
        use tower::util::ServiceExt;

        t.app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/razorpay")
                    .header("content-type", "application/json")
                    .header("X-Razorpay-Signature", "00ff")
                    .body(Body::from(r#"{"event":"payment.captured"}"#))
                    .unwrap(),
            )
            .await
            .unwrap()
    };

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_unknown_event_acknowledged() {
    let t = TestApp::new().await;

    let (status, body) = t
        .webhook(&json!({ "event": "settlement.processed", "payload": {} }), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
}

#[tokio::test]
async fn test_webhook_capture_for_unknown_order_acknowledged() {
    let t = TestApp::new().await;

    let (status, _) = t.webhook(&captured_event("order_missing", "pay_missing"), None).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_payment_failed_cancels_order() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let order_id = uuid_of(&booked["order"]["id"]);

    let event = json!({
        "event": "payment.failed",
        "payload": {
            "payment": {
                "entity": {
                    "id": "pay_declined",
                    "order_id": booked["gateway_order_id"],
                    "error_description": "Card declined by issuer"
                }
            }
        }
    });
    let (status, _) = t.webhook(&event, Some("evt_fail")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(order_json(&t, &m.customer_token, order_id).await["status"], "cancelled");
    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["status"], "failed");
    assert_eq!(payment["failure_reason"], "Card declined by issuer");
    assert_eq!(slot_status(&t, m.slot_id).await, "open");
}

// ========================================
// Ticket workflow
// ========================================

#[tokio::test]
async fn test_full_lifecycle_releases_escrow_and_pays_out() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let mut events = t.state.event_bus.subscribe();
    let (order_id, _) = book_and_pay(&t, &m).await;

    move_order(&t, &m.consultant_token, order_id, "in_progress").await;
    move_order(&t, &m.consultant_token, order_id, "resolved").await;
    let closed = move_order(&t, &m.customer_token, order_id, "closed").await;
    assert_eq!(closed["status"], "closed");

    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["escrow_status"], "released");

    let (status, payouts) = t.get("/api/payouts", Some(&m.consultant_token)).await;
    assert_eq!(status, StatusCode::OK);
    let payouts = payouts.as_array().unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0]["amount_paise"], 156_000);
    assert_eq!(payouts[0]["status"], "pending");
    let payout_id = uuid_of(&payouts[0]["id"]);

    let (status, processed) = t
        .post(
            &format!("/api/admin/payouts/{}/process", payout_id),
            Some(&m.admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", processed);
    assert_eq!(processed["status"], "processed");
    assert!(processed["gateway_payout_id"].as_str().unwrap().starts_with("pout_"));

    let (status, _) = t
        .post(
            &format!("/api/admin/payouts/{}/process", payout_id),
            Some(&m.admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert!(t.gateway.calls().contains(&GatewayCall::Payout {
        fund_account_id: "fa_test_0001".to_string(),
        amount: 156_000,
    }));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type());
    }
    for expected in [
        "OrderCreated",
        "PaymentCaptured",
        "OrderStatusChanged",
        "EscrowReleased",
        "PayoutCreated",
    ] {
        assert!(seen.contains(&expected), "missing {} in {:?}", expected, seen);
    }
}

#[tokio::test]
async fn test_customer_can_reopen_resolved_ticket() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, _) = book_and_pay(&t, &m).await;

    move_order(&t, &m.consultant_token, order_id, "in_progress").await;
    move_order(&t, &m.consultant_token, order_id, "resolved").await;
    let reopened = move_order(&t, &m.customer_token, order_id, "in_progress").await;

    assert_eq!(reopened["status"], "in_progress");
}

#[tokio::test]
async fn test_transition_rules() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, _) = book_and_pay(&t, &m).await;
    let uri = format!("/api/orders/{}/status", order_id);

    // Nonexistent transition
    let (status, _) = t
        .post(&uri, Some(&m.consultant_token), json!({ "status": "closed" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Wrong actor
    let (status, _) = t
        .post(&uri, Some(&m.customer_token), json!({ "status": "in_progress" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Outsider
    let (_, outsider) = t.register_and_login("outsider@customer.test", "customer").await;
    let (status, _) = t.post(&uri, Some(&outsider), json!({ "status": "cancelled" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.get(&format!("/api/orders/{}", order_id), Some(&outsider)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.get(&format!("/api/orders/{}", Uuid::new_v4()), Some(&outsider)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_paid_order_refunds_and_reopens_slot() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, gateway_payment_id) = book_and_pay(&t, &m).await;

    let cancelled = move_order(&t, &m.customer_token, order_id, "cancelled").await;
    assert_eq!(cancelled["status"], "cancelled");

    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["status"], "refunded");
    assert_eq!(payment["escrow_status"], "refunded");
    assert!(payment["refund_id"].as_str().unwrap().starts_with("rfnd_"));

    assert!(t.gateway.calls().contains(&GatewayCall::Refund {
        payment_id: gateway_payment_id,
        amount: HOURLY_RATE,
    }));
    assert_eq!(slot_status(&t, m.slot_id).await, "open");

    // A later refund.processed webhook is a no-op
    let event = json!({
        "event": "refund.processed",
        "payload": {
            "refund": { "entity": { "id": payment["refund_id"], "payment_id": payment["gateway_payment_id"] } }
        }
    });
    let (status, _) = t.webhook(&event, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment_json(&t, &m.customer_token, order_id).await["status"], "refunded");
}

#[tokio::test]
async fn test_refund_failure_leaves_order_open() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, _) = book_and_pay(&t, &m).await;

    t.gateway.set_failing(true);
    let (status, _) = t
        .post(
            &format!("/api/orders/{}/status", order_id),
            Some(&m.customer_token),
            json!({ "status": "cancelled" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    assert_eq!(order_json(&t, &m.customer_token, order_id).await["status"], "open");
    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["status"], "captured");
    assert_eq!(payment["escrow_status"], "held");
    assert_eq!(slot_status(&t, m.slot_id).await, "booked");
}

#[tokio::test]
async fn test_overlapping_cancels_refund_once() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, gateway_payment_id) = book_and_pay(&t, &m).await;
    let uri = format!("/api/orders/{}/status", order_id);

    let (first, second) = tokio::join!(
        t.post(&uri, Some(&m.customer_token), json!({ "status": "cancelled" })),
        t.post(&uri, Some(&m.admin_token), json!({ "status": "cancelled" })),
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let refunds = t
        .gateway
        .calls()
        .into_iter()
        .filter(|call| matches!(call, GatewayCall::Refund { .. }))
        .count();
    assert_eq!(refunds, 1);

    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["status"], "refunded");
    assert_eq!(payment["gateway_payment_id"], gateway_payment_id);
    assert_eq!(order_json(&t, &m.customer_token, order_id).await["status"], "cancelled");
    assert_eq!(slot_status(&t, m.slot_id).await, "open");
}

#[tokio::test]
async fn test_cancel_unpaid_order_cancels_payment() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let order_id = uuid_of(&booked["order"]["id"]);

    move_order(&t, &m.customer_token, order_id, "cancelled").await;

    assert_eq!(payment_json(&t, &m.customer_token, order_id).await["status"], "cancelled");
    assert_eq!(slot_status(&t, m.slot_id).await, "open");
}

#[tokio::test]
async fn test_expired_hold_then_late_capture_is_refunded() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let order_id = uuid_of(&booked["order"]["id"]);
    let gateway_order_id = booked["gateway_order_id"].as_str().unwrap();

    sqlx::query("UPDATE availability_slots SET held_until = ? WHERE id = ?")
        .bind(format_ts(Utc::now() - Duration::minutes(1)))
        .bind(m.slot_id.to_string())
        .execute(&t.state.db)
        .await
        .unwrap();

    assert_eq!(sweep_expired_holds(&t.state).await.unwrap().expired, 1);
    assert_eq!(sweep_expired_holds(&t.state).await.unwrap().expired, 0);

    assert_eq!(order_json(&t, &m.customer_token, order_id).await["status"], "cancelled");
    assert_eq!(payment_json(&t, &m.customer_token, order_id).await["status"], "expired");
    assert_eq!(slot_status(&t, m.slot_id).await, "open");

    let (status, body) = t
        .post(
            "/api/payments/verify",
            Some(&m.customer_token),
            json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_late",
                "signature": checkout_signature(gateway_order_id, "pay_late"),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let payment = payment_json(&t, &m.customer_token, order_id).await;
    assert_eq!(payment["status"], "refunded");
    assert!(t.gateway.calls().contains(&GatewayCall::Refund {
        payment_id: "pay_late".to_string(),
        amount: HOURLY_RATE,
    }));
}

async fn expire_all_holds(t: &TestApp) {
    sqlx::query("UPDATE availability_slots SET held_until = ? WHERE status = 'held'")
        .bind(format_ts(Utc::now() - Duration::minutes(1)))
        .execute(&t.state.db)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_late_capture_webhook_then_verify_conflicts() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let order_id = uuid_of(&booked["order"]["id"]);
    let gateway_order_id = booked["gateway_order_id"].as_str().unwrap();

    expire_all_holds(&t).await;
    assert_eq!(sweep_expired_holds(&t.state).await.unwrap().expired, 1);

    // Gateway reports the capture before the browser calls back
    let (status, _) = t
        .webhook(&captured_event(gateway_order_id, "pay_after_expiry"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment_json(&t, &m.customer_token, order_id).await["status"], "refunded");

    let (status, body) = t
        .post(
            "/api/payments/verify",
            Some(&m.customer_token),
            json!({
                "gateway_order_id": gateway_order_id,
                "gateway_payment_id": "pay_after_expiry",
                "signature": checkout_signature(gateway_order_id, "pay_after_expiry"),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let refunds: Vec<_> = t
        .gateway
        .calls()
        .into_iter()
        .filter(|call| matches!(call, GatewayCall::Refund { .. }))
        .collect();
    assert_eq!(
        refunds,
        vec![GatewayCall::Refund {
            payment_id: "pay_after_expiry".to_string(),
            amount: HOURLY_RATE,
        }]
    );
    assert_eq!(order_json(&t, &m.customer_token, order_id).await["status"], "cancelled");
}

#[tokio::test]
async fn test_sweep_continues_past_failing_order() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let stuck = book(&t, &m).await;
    let stuck_id = uuid_of(&stuck["order"]["id"]);

    let (starts_at, ends_at) = slot_window(2);
    let (status, slot) = t
        .post(
            "/api/availability",
            Some(&m.consultant_token),
            json!({ "starts_at": starts_at, "ends_at": ends_at }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", slot);
    let m = helpers::Marketplace {
        slot_id: uuid_of(&slot["id"]),
        ..m
    };
    let other = book(&t, &m).await;
    let other_id = uuid_of(&other["order"]["id"]);

    expire_all_holds(&t).await;
    sqlx::query(&format!(
        "CREATE TRIGGER reject_history BEFORE INSERT ON order_status_history \
         WHEN NEW.order_id = '{}' BEGIN SELECT RAISE(ABORT, 'history unavailable'); END",
        stuck_id
    ))
    .execute(&t.state.db)
    .await
    .unwrap();

    let report = sweep_expired_holds(&t.state).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, stuck_id);
    assert_eq!(order_json(&t, &m.customer_token, other_id).await["status"], "cancelled");
    assert_eq!(order_json(&t, &m.customer_token, stuck_id).await["status"], "pending_payment");

    // Picked up again once the fault clears
    sqlx::query("DROP TRIGGER reject_history")
        .execute(&t.state.db)
        .await
        .unwrap();
    let report = sweep_expired_holds(&t.state).await.unwrap();
    assert_eq!(report.expired, 1);
    assert!(report.failures.is_empty());
    assert_eq!(order_json(&t, &m.customer_token, stuck_id).await["status"], "cancelled");
}

#[tokio::test]
async fn test_unexpired_hold_is_left_alone() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    book(&t, &m).await;

    assert_eq!(sweep_expired_holds(&t.state).await.unwrap().expired, 0);
    assert_eq!(slot_status(&t, m.slot_id).await, "held");
}

#[tokio::test]
async fn test_order_listing_scoped_and_paginated() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, _) = book_and_pay(&t, &m).await;

    let (status, mine) = t.get("/api/orders", Some(&m.customer_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["orders"].as_array().unwrap().len(), 1);
    assert_eq!(mine["pagination"]["total_results"], 1);
    assert_eq!(mine["pagination"]["page"], 1);

    let (_, consultant) = t.get("/api/orders?status=open", Some(&m.consultant_token)).await;
    assert_eq!(uuid_of(&consultant["orders"][0]["id"]), order_id);

    let (_, none) = t.get("/api/orders?status=closed", Some(&m.consultant_token)).await;
    assert!(none["orders"].as_array().unwrap().is_empty());

    let (_, outsider) = t.register_and_login("nosy@customer.test", "customer").await;
    let (_, theirs) = t.get("/api/orders", Some(&outsider)).await;
    assert!(theirs["orders"].as_array().unwrap().is_empty());

    let (_, all) = t.get("/api/orders", Some(&m.admin_token)).await;
    assert_eq!(all["orders"].as_array().unwrap().len(), 1);

    let (status, _) = t.get("/api/orders?status=bogus", Some(&m.admin_token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ========================================
// Messaging and ratings
// ========================================

#[tokio::test]
async fn test_conversation_flow() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, _) = book_and_pay(&t, &m).await;
    let uri = format!("/api/orders/{}/messages", order_id);
    let mut events = t.state.event_bus.subscribe();

    let (status, message) = t
        .post(&uri, Some(&m.customer_token), json!({ "body": "  Logs attached in SM21  " }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["body"], "Logs attached in SM21");

    match events.try_recv().unwrap() {
        PulseEvent::MessagePosted { recipient_id, .. } => assert_eq!(recipient_id, m.consultant_id),
        other => panic!("unexpected event {:?}", other),
    }

    let (_, listed) = t.get(&uri, Some(&m.consultant_token)).await;
    assert_eq!(listed["messages"].as_array().unwrap().len(), 1);
    assert!(listed["messages"][0]["read_at"].is_null());

    let read_uri = format!("/api/orders/{}/messages/read", order_id);
    let (_, marked) = t.post(&read_uri, Some(&m.consultant_token), json!({})).await;
    assert_eq!(marked["marked"], 1);

    // Own messages are never marked by the sender
    let (_, marked) = t.post(&read_uri, Some(&m.customer_token), json!({})).await;
    assert_eq!(marked["marked"], 0);

    // Admin can read, not write
    let (status, _) = t.get(&uri, Some(&m.admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = t.post(&uri, Some(&m.admin_token), json!({ "body": "hi" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.post(&uri, Some(&m.customer_token), json!({ "body": "   " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .post(&uri, Some(&m.customer_token), json!({ "body": "x".repeat(4001) }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_messages_closed_after_cancel() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let booked = book(&t, &m).await;
    let order_id = uuid_of(&booked["order"]["id"]);
    move_order(&t, &m.customer_token, order_id, "cancelled").await;

    let (status, _) = t
        .post(
            &format!("/api/orders/{}/messages", order_id),
            Some(&m.customer_token),
            json!({ "body": "still there?" }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_rating_rules_and_aggregate() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let (order_id, _) = book_and_pay(&t, &m).await;
    let uri = format!("/api/orders/{}/rating", order_id);

    let (status, _) = t.post(&uri, Some(&m.customer_token), json!({ "score": 5 })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    move_order(&t, &m.consultant_token, order_id, "in_progress").await;
    move_order(&t, &m.consultant_token, order_id, "resolved").await;

    let (status, _) = t.post(&uri, Some(&m.customer_token), json!({ "score": 6 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t.post(&uri, Some(&m.consultant_token), json!({ "score": 5 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, rating) = t
        .post(
            &uri,
            Some(&m.customer_token),
            json!({ "score": 4, "comment": "Fixed the transport queue quickly" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", rating);

    let (status, _) = t.post(&uri, Some(&m.customer_token), json!({ "score": 5 })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, profile) = t.get(&format!("/api/consultants/{}", m.consultant_id), None).await;
    assert_eq!(profile["rating_count"], 1);
    assert_eq!(profile["rating_avg"], 4.0);

    let (_, ratings) = t
        .get(&format!("/api/consultants/{}/ratings", m.consultant_id), None)
        .await;
    assert_eq!(ratings.as_array().unwrap().len(), 1);
    assert_eq!(ratings[0]["score"], 4);
}

// ========================================
// Payouts
// ========================================

async fn closed_order_payout(t: &TestApp, m: &helpers::Marketplace) -> Uuid {
    let (order_id, _) = book_and_pay(t, m).await;
    move_order(t, &m.consultant_token, order_id, "in_progress").await;
    move_order(t, &m.consultant_token, order_id, "resolved").await;
    move_order(t, &m.admin_token, order_id, "closed").await;

    let (_, payouts) = t.get("/api/payouts", Some(&m.admin_token)).await;
    uuid_of(&payouts[0]["id"])
}

#[tokio::test]
async fn test_payout_visibility() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    closed_order_payout(&t, &m).await;

    let (status, _) = t.get("/api/payouts", Some(&m.customer_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, all) = t.get("/api/payouts", Some(&m.admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_payout_can_be_retried() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let payout_id = closed_order_payout(&t, &m).await;
    let uri = format!("/api/admin/payouts/{}/process", payout_id);

    t.gateway.set_failing(true);
    let (status, _) = t.post(&uri, Some(&m.admin_token), json!({})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, payouts) = t.get("/api/payouts", Some(&m.consultant_token)).await;
    assert_eq!(payouts[0]["status"], "failed");
    assert!(payouts[0]["failure_reason"].as_str().is_some());

    t.gateway.set_failing(false);
    let (status, processed) = t.post(&uri, Some(&m.admin_token), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(processed["status"], "processed");
}

#[tokio::test]
async fn test_overlapping_payout_requests_pay_once() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let payout_id = closed_order_payout(&t, &m).await;
    let uri = format!("/api/admin/payouts/{}/process", payout_id);

    let (first, second) = tokio::join!(
        t.post(&uri, Some(&m.admin_token), json!({})),
        t.post(&uri, Some(&m.admin_token), json!({})),
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let payouts = t
        .gateway
        .calls()
        .into_iter()
        .filter(|call| matches!(call, GatewayCall::Payout { .. }))
        .count();
    assert_eq!(payouts, 1);

    let (_, listed) = t.get("/api/payouts", Some(&m.admin_token)).await;
    assert_eq!(listed[0]["status"], "processed");
}

#[tokio::test]
async fn test_payout_requires_account_and_admin() {
    let t = TestApp::new().await;
    let m = seed_marketplace(&t).await;
    let payout_id = closed_order_payout(&t, &m).await;
    let uri = format!("/api/admin/payouts/{}/process", payout_id);

    let (status, _) = t.post(&uri, Some(&m.consultant_token), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    sqlx::query("UPDATE consultant_profiles SET payout_account_id = NULL WHERE user_id = ?")
        .bind(m.consultant_id.to_string())
        .execute(&t.state.db)
        .await
        .unwrap();

    let (status, _) = t.post(&uri, Some(&m.admin_token), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
