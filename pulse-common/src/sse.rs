//! Server-Sent Events (SSE) utilities

use crate::events::{EventBus, PulseEvent};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Heartbeat interval for idle connections
const HEARTBEAT_SECS: u64 = 15;

/// Build an SSE frame for an event
fn to_sse_event(event: &PulseEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: failed to serialize {}: {}", event.event_type(), e);
            None
        }
    }
}

/// Stream the events visible to `user_id`
///
/// Sends a `ConnectionStatus` frame first, then every bus event whose
/// audience contains the user. A lagging client skips dropped events and
/// keeps streaming.
pub fn create_user_event_stream(
    service_name: &'static str,
    event_bus: &EventBus,
    user_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = event_bus.subscribe();
    info!(
        user_id = %user_id,
        subscribers = event_bus.subscriber_count(),
        "New SSE client connected to {} events",
        service_name
    );

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !event.is_visible_to(user_id) {
                        continue;
                    }
                    if let Some(frame) = to_sse_event(&event) {
                        debug!(user_id = %user_id, event_type = event.event_type(), "SSE: forwarding event");
                        yield Ok(frame);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "SSE client lagging, events dropped");
                }
                Err(RecvError::Closed) => {
                    info!("SSE: {} event bus closed", service_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(HEARTBEAT_SECS))
            .text("heartbeat"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_to_sse_event_serializes() {
        let event = PulseEvent::PayoutCreated {
            payout_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            consultant_id: Uuid::new_v4(),
            amount_paise: 500,
            timestamp: Utc::now(),
        };
        assert!(to_sse_event(&event).is_some());
    }
}
