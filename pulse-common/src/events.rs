//! Domain events and the in-process event bus
//!
//! Every state change in the booking, payment and ticket flows emits a
//! `PulseEvent`. Events carry the user ids of the parties involved so the
//! SSE endpoint can forward each event only to users allowed to see it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Marketplace event
///
/// Serialized with an internal `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PulseEvent {
    /// Order booked, slot held, awaiting payment
    OrderCreated {
        order_id: Uuid,
        customer_id: Uuid,
        consultant_id: Uuid,
        amount_paise: i64,
        timestamp: DateTime<Utc>,
    },

    /// Ticket moved through the status workflow
    OrderStatusChanged {
        order_id: Uuid,
        customer_id: Uuid,
        consultant_id: Uuid,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// Gateway payment captured, funds held in escrow
    PaymentCaptured {
        order_id: Uuid,
        payment_id: Uuid,
        customer_id: Uuid,
        consultant_id: Uuid,
        amount_paise: i64,
        timestamp: DateTime<Utc>,
    },

    /// Gateway reported a failed payment
    PaymentFailed {
        order_id: Uuid,
        customer_id: Uuid,
        consultant_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Escrow released on ticket close
    EscrowReleased {
        order_id: Uuid,
        customer_id: Uuid,
        consultant_id: Uuid,
        amount_paise: i64,
        timestamp: DateTime<Utc>,
    },

    /// Consultant payout recorded
    PayoutCreated {
        payout_id: Uuid,
        order_id: Uuid,
        consultant_id: Uuid,
        amount_paise: i64,
        timestamp: DateTime<Utc>,
    },

    /// New conversation message
    MessagePosted {
        order_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Customer rated a consultant
    RatingSubmitted {
        order_id: Uuid,
        customer_id: Uuid,
        consultant_id: Uuid,
        score: i64,
        timestamp: DateTime<Utc>,
    },
}

impl PulseEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            PulseEvent::OrderCreated { .. } => "OrderCreated",
            PulseEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
            PulseEvent::PaymentCaptured { .. } => "PaymentCaptured",
            PulseEvent::PaymentFailed { .. } => "PaymentFailed",
            PulseEvent::EscrowReleased { .. } => "EscrowReleased",
            PulseEvent::PayoutCreated { .. } => "PayoutCreated",
            PulseEvent::MessagePosted { .. } => "MessagePosted",
            PulseEvent::RatingSubmitted { .. } => "RatingSubmitted",
        }
    }

    /// Users who may receive this event
    pub fn audience(&self) -> Vec<Uuid> {
        match self {
            PulseEvent::OrderCreated {
                customer_id,
                consultant_id,
                ..
            }
            | PulseEvent::OrderStatusChanged {
                customer_id,
                consultant_id,
                ..
            }
            | PulseEvent::PaymentCaptured {
                customer_id,
                consultant_id,
                ..
            }
            | PulseEvent::PaymentFailed {
                customer_id,
                consultant_id,
                ..
            }
            | PulseEvent::EscrowReleased {
                customer_id,
                consultant_id,
                ..
            }
            | PulseEvent::RatingSubmitted {
                customer_id,
                consultant_id,
                ..
            } => vec![*customer_id, *consultant_id],
            PulseEvent::PayoutCreated { consultant_id, .. } => vec![*consultant_id],
            PulseEvent::MessagePosted {
                sender_id,
                recipient_id,
                ..
            } => vec![*sender_id, *recipient_id],
        }
    }

    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.audience().contains(&user_id)
    }
}

/// Broadcast bus for `PulseEvent`
///
/// Cloning is cheap; all clones share one channel. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PulseEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use pulse_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PulseEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PulseEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            tracing::trace!(event_type, "No SSE subscribers for event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
