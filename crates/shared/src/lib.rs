//! Huddle Shared Types and Utilities
//!
//! This crate contains identifiers, domain enums, errors, and database helpers
//! shared across the Huddle collaboration relay.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
