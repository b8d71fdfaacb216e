//! Orders (support tickets): booking, listing and status workflow

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::require_role;
use crate::db;
use crate::db::orders::OrderFilter;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, Order, OrderStatus, Priority, Role, StatusChange};
use crate::pagination::{calculate_pagination, Pagination, PAGE_SIZE};
use crate::services::{booking, ticket_workflow};
use crate::AppState;

/// Load an order the caller may see (participant or admin)
pub(crate) async fn load_visible_order(
    state: &AppState,
    auth: &AuthUser,
    id: Uuid,
) -> ApiResult<Order> {
    let order = db::orders::load_order(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {} not found", id)))?;

    if order.participant(auth.id(), auth.is_admin()).is_none() {
        return Err(ApiError::Forbidden("Not a participant of this order".to_string()));
    }
    Ok(order)
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub choice_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    pub module_code: Option<String>,
}

/// Booked order with checkout parameters
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order: Order,
    pub payment_id: Uuid,
    pub gateway_order_id: String,
    /// Razorpay public key for the checkout widget
    pub key_id: String,
    pub amount_paise: i64,
    pub currency: String,
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<impl IntoResponse> {
    require_role(&auth, Role::Customer)?;

    let outcome = booking::book_order(
        &state,
        auth.id(),
        booking::BookingRequest {
            choice_id: req.choice_id,
            title: req.title,
            description: req.description,
            priority: req.priority,
            module_code: req.module_code,
        },
    )
    .await?;

    let response = CreateOrderResponse {
        payment_id: outcome.payment.id,
        gateway_order_id: outcome.payment.gateway_order_id,
        key_id: state.gateway.key_id().to_string(),
        amount_paise: outcome.payment.amount_paise,
        currency: outcome.payment.currency,
        order: outcome.order,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<Order>,
    pub pagination: Pagination,
}

/// GET /api/orders?status=&page=
///
/// Customers and consultants see their own orders; admins see all.
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<Json<OrderListResponse>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()?;
    let filter = OrderFilter {
        participant: (!auth.is_admin()).then(|| auth.id()),
        status,
    };

    let total = db::orders::count_orders(&state.db, &filter).await?;
    let pagination = calculate_pagination(total, query.page.unwrap_or(1));
    let orders = db::orders::list_orders(&state.db, &filter, PAGE_SIZE, pagination.offset).await?;

    Ok(Json(OrderListResponse { orders, pagination }))
}

/// GET /api/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Order>> {
    Ok(Json(load_visible_order(&state, &auth, id).await?))
}

/// GET /api/orders/:id/history
pub async fn get_order_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<StatusChange>>> {
    let order = load_visible_order(&state, &auth, id).await?;
    Ok(Json(
        db::orders::list_status_history(&state.db, order.id).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub note: String,
}

/// POST /api/orders/:id/status
pub async fn change_order_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> ApiResult<Json<Order>> {
    let order = ticket_workflow::change_status(&state, &auth, id, req.status, &req.note).await?;
    Ok(Json(order))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/:id", get(get_order))
        .route("/api/orders/:id/history", get(get_order_history))
        .route("/api/orders/:id/status", post(change_order_status))
}
