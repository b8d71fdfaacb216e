//! pulse-api library - Basis Pulse marketplace service
//!
//! HTTP API for request intake, consultant availability, booking, ticket
//! workflow, messaging, ratings and Razorpay payment/escrow/payout handling.

use axum::Router;
use chrono::{DateTime, Utc};
use pulse_common::config::PulseConfig;
use pulse_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod pagination;
pub mod services;

use services::PaymentGateway;

/// Event bus capacity (events buffered per slow subscriber)
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Resolved configuration
    pub config: Arc<PulseConfig>,
    /// Broadcast bus for SSE clients
    pub event_bus: EventBus,
    /// Payment gateway (Razorpay in production)
    pub gateway: Arc<dyn PaymentGateway>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: PulseConfig, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            db,
            config: Arc::new(config),
            event_bus: EventBus::new(EVENT_BUS_CAPACITY),
            gateway,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Health, registration/login, the public catalogue and the gateway webhook
/// are open; everything else requires a bearer session.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;

    let protected = Router::new()
        .merge(api::session_routes())
        .merge(api::admin_taxonomy_routes())
        .merge(api::profile_routes())
        .merge(api::availability_routes())
        .merge(api::choice_routes())
        .merge(api::order_routes())
        .merge(api::payment_routes())
        .merge(api::message_routes())
        .merge(api::rating_routes())
        .merge(api::payout_routes())
        .merge(api::event_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth_middleware,
        ));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::account_routes())
        .merge(api::catalogue_routes())
        .merge(api::consultant_routes())
        .merge(api::webhook_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
