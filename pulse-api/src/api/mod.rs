//! HTTP API handlers for pulse-api

pub mod auth;
pub mod availability;
pub mod choices;
pub mod consultants;
pub mod health;
pub mod messages;
pub mod orders;
pub mod payments;
pub mod payouts;
pub mod ratings;
pub mod sse;
pub mod taxonomy;
pub mod webhooks;

pub use auth::{account_routes, auth_middleware, session_routes};
pub use availability::availability_routes;
pub use choices::choice_routes;
pub use consultants::{consultant_routes, profile_routes};
pub use health::health_routes;
pub use messages::message_routes;
pub use orders::order_routes;
pub use payments::payment_routes;
pub use payouts::payout_routes;
pub use ratings::rating_routes;
pub use sse::event_routes;
pub use taxonomy::{admin_taxonomy_routes, catalogue_routes};
pub use webhooks::webhook_routes;
