//! # Basis Pulse Common Library
//!
//! Shared code for the Basis Pulse services including:
//! - Database initialization, schema and migrations
//! - Domain event types (PulseEvent) and the event bus
//! - Credential and signature primitives
//! - Configuration loading
//! - Fee-split arithmetic

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod money;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use money::FeeSplit;
