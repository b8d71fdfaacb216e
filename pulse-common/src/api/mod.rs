//! Credential and signature primitives shared by Basis Pulse services
//!
//! # Design Principle
//!
//! This module contains ONLY pure functions (no HTTP framework dependencies).
//! The service wraps these with axum middleware and handlers.

pub mod credentials;
pub mod signature;

pub use credentials::{
    generate_salt, generate_session_token, hash_password, hash_token, verify_password,
};
pub use signature::{
    hmac_sha256_hex, verify_payment_signature, verify_webhook_signature, SignatureError,
};
