//! Business logic for the marketplace flows

pub mod accounts;
pub mod availability;
pub mod booking;
pub mod gateway;
pub mod hold_sweeper;
pub mod payment_flow;
pub mod payouts;
pub mod ticket_workflow;

pub use gateway::{GatewayError, PaymentGateway, RazorpayClient};
