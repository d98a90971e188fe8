//! Tidepool Core - Shared types library.
//!
//! This crate provides common types used across all Tidepool components:
//! - `checkout` - Cart and checkout engine behind the storefront UI
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no storage.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, money, and quantities

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
