//! Order conversation endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use pulse_common::events::PulseEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::orders::load_visible_order;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{AuthUser, Conversation, Message, Order};
use crate::pagination::{calculate_pagination, PageQuery, Pagination, PAGE_SIZE};
use crate::AppState;

/// Maximum message length in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

async fn conversation_for(state: &AppState, order: &Order) -> ApiResult<Conversation> {
    db::messages::load_conversation_for_order(&state.db, order.id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Order {} has no conversation", order.id)))
}

fn validate_body(body: &str) -> ApiResult<String> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ApiError::BadRequest("Message body is empty".to_string()));
    }
    if body.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Message body exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(body.to_string())
}

#[derive(Debug, Serialize)]
pub struct MessageListResponse {
    pub order_id: Uuid,
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

/// GET /api/orders/:id/messages?page=
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<MessageListResponse>> {
    let order = load_visible_order(&state, &auth, id).await?;
    let conversation = conversation_for(&state, &order).await?;

    let total = db::messages::count_messages(&state.db, conversation.id).await?;
    let pagination = calculate_pagination(total, query.page.unwrap_or(1));
    let messages =
        db::messages::list_messages(&state.db, conversation.id, PAGE_SIZE, pagination.offset).await?;

    Ok(Json(MessageListResponse {
        order_id: order.id,
        messages,
        pagination,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub body: String,
}

/// POST /api/orders/:id/messages
///
/// Only the customer and consultant of the order may post.
pub async fn post_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<PostMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let order = load_visible_order(&state, &auth, id).await?;
    if order.participant(auth.id(), false).is_none() {
        return Err(ApiError::Forbidden(
            "Only the order's customer and consultant can post messages".to_string(),
        ));
    }
    if order.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Order {} is {}; conversation is closed",
            order.id, order.status
        )));
    }

    let body = validate_body(&req.body)?;
    let conversation = conversation_for(&state, &order).await?;

    let message = Message {
        id: Uuid::new_v4(),
        conversation_id: conversation.id,
        sender_id: auth.id(),
        body,
        created_at: Utc::now(),
        read_at: None,
    };
    db::messages::insert_message(&state.db, &message).await?;

    tracing::debug!(order_id = %order.id, message_id = %message.id, "Message posted");

    state.event_bus.emit_lossy(PulseEvent::MessagePosted {
        order_id: order.id,
        message_id: message.id,
        sender_id: message.sender_id,
        recipient_id: order.counterpart(auth.id()),
        timestamp: message.created_at,
    });

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: u64,
}

/// POST /api/orders/:id/messages/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MarkReadResponse>> {
    let order = load_visible_order(&state, &auth, id).await?;
    if order.participant(auth.id(), false).is_none() {
        return Err(ApiError::Forbidden("Not a participant of this order".to_string()));
    }
    let conversation = conversation_for(&state, &order).await?;

    let marked = db::messages::mark_read(&state.db, conversation.id, auth.id(), Utc::now()).await?;
    Ok(Json(MarkReadResponse { marked }))
}

pub fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders/:id/messages", get(list_messages).post(post_message))
        .route("/api/orders/:id/messages/read", post(mark_read))
}
