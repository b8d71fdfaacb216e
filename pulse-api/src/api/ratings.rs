//! Customer ratings

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Extension, Json, Router,
};
use chrono::Utc;
use pulse_common::events::PulseEvent;
use serde::Deserialize;
use uuid::Uuid;

use super::orders::load_visible_order;
use crate::db;
use crate::error::{is_unique_violation, ApiError, ApiResult};
use crate::models::{AuthUser, OrderStatus, Rating};
use crate::AppState;

const MAX_COMMENT_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    pub score: i64,
    #[serde(default)]
    pub comment: String,
}

/// POST /api/orders/:id/rating
pub async fn submit_rating(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RatingRequest>,
) -> ApiResult<impl IntoResponse> {
    let order = load_visible_order(&state, &auth, id).await?;
    if order.customer_id != auth.id() {
        return Err(ApiError::Forbidden(
            "Only the order's customer can rate it".to_string(),
        ));
    }
    if !matches!(order.status, OrderStatus::Resolved | OrderStatus::Closed) {
        return Err(ApiError::Conflict(format!(
            "Order {} is {}; only resolved or closed orders can be rated",
            order.id, order.status
        )));
    }
    if !(1..=5).contains(&req.score) {
        return Err(ApiError::BadRequest("Score must be between 1 and 5".to_string()));
    }
    let comment = req.comment.trim().to_string();
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Comment exceeds {} characters",
            MAX_COMMENT_CHARS
        )));
    }

    let rating = Rating {
        order_id: order.id,
        customer_id: order.customer_id,
        consultant_id: order.consultant_id,
        score: req.score,
        comment,
        created_at: Utc::now(),
    };

    let mut tx = state.db.begin().await?;
    match db::ratings::insert_rating(&mut *tx, &rating).await {
        Ok(()) => {}
        Err(pulse_common::Error::Database(e)) if is_unique_violation(&e) => {
            return Err(ApiError::Conflict(format!("Order {} is already rated", order.id)));
        }
        Err(e) => return Err(e.into()),
    }
    db::consultants::refresh_rating(&mut *tx, rating.consultant_id, rating.created_at).await?;
    tx.commit().await?;

    tracing::info!(
        order_id = %order.id,
        consultant_id = %rating.consultant_id,
        score = rating.score,
        "Rating submitted"
    );

    state.event_bus.emit_lossy(PulseEvent::RatingSubmitted {
        order_id: order.id,
        customer_id: rating.customer_id,
        consultant_id: rating.consultant_id,
        score: rating.score,
        timestamp: rating.created_at,
    });

    Ok((StatusCode::CREATED, Json(rating)))
}

pub fn rating_routes() -> Router<AppState> {
    Router::new().route("/api/orders/:id/rating", post(submit_rating))
}
