//! Database module
//!
//! Schema creation, versioned migrations and row codec helpers for the
//! shared SQLite database.

pub mod codec;
pub mod init;
pub mod migrations;

pub use codec::{format_ts, parse_ts, parse_uuid};
pub use init::{init_database, init_memory_database};
