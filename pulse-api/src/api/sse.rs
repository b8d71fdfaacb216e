//! Server-Sent Events endpoint

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Extension, Router,
};
use futures::stream::Stream;
use pulse_common::sse::create_user_event_stream;
use std::convert::Infallible;

use crate::models::AuthUser;
use crate::AppState;

/// GET /events
///
/// Streams the caller's marketplace events.
pub async fn event_stream(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    create_user_event_stream("pulse-api", &state.event_bus, auth.id())
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/events", get(event_stream))
}
