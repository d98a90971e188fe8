//! Core types for Tidepool.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod id;
pub mod money;
pub mod quantity;

pub use id::*;
pub use money::{DEFAULT_CURRENCY, Money};
pub use quantity::{MAX_QUANTITY, Quantity};
