//! Shared fixtures for pulse-api integration tests
//!
//! Each test gets its own in-memory database and a `FakeGateway` that
//! records calls and can be switched into failure mode.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, DurationRound, Utc};
use http_body_util::BodyExt;
use pulse_api::services::gateway::{
    CreateOrderRequest, GatewayError, GatewayOrder, GatewayPayout, GatewayRefund,
};
use pulse_api::services::{accounts, PaymentGateway};
use pulse_api::AppState;
use pulse_common::api::hmac_sha256_hex;
use pulse_common::config::PulseConfig;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;
use uuid::Uuid;

pub const KEY_ID: &str = "rzp_test_key";
pub const KEY_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const PASSWORD: &str = "correct horse battery";
pub const ADMIN_EMAIL: &str = "admin@pulse.test";

/// 2000.00 INR per hour
pub const HOURLY_RATE: i64 = 200_000;

/// Gateway call recorded by `FakeGateway`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    CreateOrder { receipt: String, amount: i64 },
    Refund { payment_id: String, amount: i64 },
    Payout { fund_account_id: String, amount: i64 },
}

/// In-process stand-in for Razorpay
#[derive(Default)]
pub struct FakeGateway {
    failing: AtomicBool,
    counter: AtomicUsize,
    calls: Mutex<Vec<GatewayCall>>,
}

impl FakeGateway {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{:04}", prefix, self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(GatewayError::Api {
                status: 500,
                description: "Simulated gateway outage".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn key_id(&self) -> &str {
        KEY_ID
    }

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        self.record(GatewayCall::CreateOrder {
            receipt: request.receipt.clone(),
            amount: request.amount,
        });
        self.check()?;
        Ok(GatewayOrder {
            id: self.next_id("order"),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: "created".to_string(),
        })
    }

    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: i64,
    ) -> Result<GatewayRefund, GatewayError> {
        self.record(GatewayCall::Refund {
            payment_id: payment_id.to_string(),
            amount,
        });
        // Let overlapping requests run while the "network call" is in flight
        tokio::task::yield_now().await;
        self.check()?;
        Ok(GatewayRefund {
            id: self.next_id("rfnd"),
            payment_id: payment_id.to_string(),
            amount,
            status: Some("processed".to_string()),
        })
    }

    async fn create_payout(
        &self,
        fund_account_id: &str,
        amount: i64,
        _reference_id: &str,
    ) -> Result<GatewayPayout, GatewayError> {
        self.record(GatewayCall::Payout {
            fund_account_id: fund_account_id.to_string(),
            amount,
        });
        tokio::task::yield_now().await;
        self.check()?;
        Ok(GatewayPayout {
            id: self.next_id("pout"),
            status: "processing".to_string(),
            amount: Some(amount),
        })
    }
}

pub fn test_config() -> PulseConfig {
    let mut config = PulseConfig::default();
    config.razorpay.key_id = KEY_ID.to_string();
    config.razorpay.key_secret = KEY_SECRET.to_string();
    config.razorpay.webhook_secret = WEBHOOK_SECRET.to_string();
    config
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = pulse_common::db::init_memory_database()
            .await
            .expect("memory database");
        let gateway = Arc::new(FakeGateway::default());
        let state = AppState::new(db, test_config(), gateway.clone());
        let app = pulse_api::build_router(state.clone());
        Self { app, state, gateway }
    }

    /// Send a request, returning status and parsed JSON body (Null when empty)
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, extract_json(response.into_body()).await)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, token, None).await
    }

    /// Post a raw webhook body with a valid signature
    pub async fn webhook(&self, body: &Value, event_id: Option<&str>) -> (StatusCode, Value) {
        let raw = body.to_string();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/webhooks/razorpay")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Razorpay-Signature", hmac_sha256_hex(WEBHOOK_SECRET, raw.as_bytes()));
        if let Some(id) = event_id {
            builder = builder.header("X-Razorpay-Event-Id", id);
        }
        let response = self
            .app
            .clone()
            .oneshot(builder.body(Body::from(raw)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, extract_json(response.into_body()).await)
    }

    /// Register a user and log in; returns (user id, bearer token)
    pub async fn register_and_login(&self, email: &str, role: &str) -> (Uuid, String) {
        let (status, user) = self
            .post(
                "/api/auth/register",
                None,
                json!({
                    "email": email,
                    "password": PASSWORD,
                    "display_name": email.split('@').next().unwrap(),
                    "role": role,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {}: {}", email, user);

        let token = self.login(email).await;
        (uuid_of(&user["id"]), token)
    }

    pub async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .post(
                "/api/auth/login",
                None,
                json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login {}: {}", email, body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Bootstrap the admin account and log in
    pub async fn admin_token(&self) -> String {
        accounts::ensure_admin(&self.state.db, ADMIN_EMAIL, PASSWORD)
            .await
            .unwrap();
        self.login(ADMIN_EMAIL).await
    }
}

pub async fn extract_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

pub fn uuid_of(value: &Value) -> Uuid {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| panic!("not a uuid: {}", value))
}

/// Checkout callback signature as Razorpay computes it
pub fn checkout_signature(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    hmac_sha256_hex(
        KEY_SECRET,
        format!("{}|{}", gateway_order_id, gateway_payment_id).as_bytes(),
    )
}

/// One-hour slot starting `days_ahead` days from now on a whole hour
pub fn slot_window(days_ahead: i64) -> (String, String) {
    let start = (Utc::now() + Duration::days(days_ahead))
        .duration_trunc(Duration::hours(1))
        .unwrap();
    let end = start + Duration::hours(1);
    (start.to_rfc3339(), end.to_rfc3339())
}

/// Actors and catalogue entries for booking scenarios
pub struct Marketplace {
    pub admin_token: String,
    pub customer_id: Uuid,
    pub customer_token: String,
    pub consultant_id: Uuid,
    pub consultant_token: String,
    pub service_type_id: Uuid,
    pub slot_id: Uuid,
}

/// Admin, a priced consultant with one open slot, and a customer
pub async fn seed_marketplace(t: &TestApp) -> Marketplace {
    let admin_token = t.admin_token().await;

    let (status, service_types) = t.get("/api/service-types", None).await;
    assert_eq!(status, StatusCode::OK);
    let service_type_id = uuid_of(&service_types[0]["id"]);

    let (consultant_id, consultant_token) =
        t.register_and_login("basis.guru@pulse.test", "consultant").await;
    let (status, profile) = t
        .put(
            "/api/profile",
            Some(&consultant_token),
            json!({
                "headline": "SAP Basis on-call",
                "bio": "Kernel upgrades, transports, HANA tuning",
                "hourly_rate_paise": HOURLY_RATE,
                "modules": ["BASIS", "HANA"],
                "payout_account_id": "fa_test_0001",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "profile: {}", profile);

    let (starts_at, ends_at) = slot_window(1);
    let (status, slot) = t
        .post(
            "/api/availability",
            Some(&consultant_token),
            json!({ "starts_at": starts_at, "ends_at": ends_at }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "slot: {}", slot);

    let (customer_id, customer_token) =
        t.register_and_login("it.manager@customer.test", "customer").await;

    Marketplace {
        admin_token,
        customer_id,
        customer_token,
        consultant_id,
        consultant_token,
        service_type_id,
        slot_id: uuid_of(&slot["id"]),
    }
}

/// Create a choice for the seeded slot; returns the choice id
pub async fn choose_slot(t: &TestApp, m: &Marketplace) -> Uuid {
    let (status, choice) = t
        .post(
            "/api/choices",
            Some(&m.customer_token),
            json!({
                "service_type_id": m.service_type_id,
                "consultant_id": m.consultant_id,
                "slot_id": m.slot_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "choice: {}", choice);
    uuid_of(&choice["id"])
}

/// Book the seeded slot; returns the create-order response
pub async fn book(t: &TestApp, m: &Marketplace) -> Value {
    let choice_id = choose_slot(t, m).await;
    let (status, body) = t
        .post(
            "/api/orders",
            Some(&m.customer_token),
            json!({
                "choice_id": choice_id,
                "title": "Transport queue stuck after kernel patch",
                "description": "STMS imports hang in status 'running'",
                "priority": "high",
                "module_code": "basis",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "order: {}", body);
    body
}

/// Book and pay through the checkout callback; returns the order id
pub async fn book_and_pay(t: &TestApp, m: &Marketplace) -> (Uuid, String) {
    let booked = book(t, m).await;
    let order_id = uuid_of(&booked["order"]["id"]);
    let gateway_order_id = booked["gateway_order_id"].as_str().unwrap().to_string();
    let gateway_payment_id = format!("pay_{}", &order_id.simple().to_string()[..8]);

    let (status, body) = t
        .post(
            "/api/payments/verify",
            Some(&m.customer_token),
            json!({
                "razorpay_order_id": gateway_order_id,
                "razorpay_payment_id": gateway_payment_id,
                "razorpay_signature": checkout_signature(&gateway_order_id, &gateway_payment_id),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "verify: {}", body);
    (order_id, gateway_payment_id)
}

/// Move an order through the status endpoint, asserting success
pub async fn move_order(t: &TestApp, token: &str, order_id: Uuid, to: &str) -> Value {
    let (status, body) = t
        .post(
            &format!("/api/orders/{}/status", order_id),
            Some(token),
            json!({ "status": to, "note": format!("moving to {}", to) }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "status {}: {}", to, body);
    body
}
