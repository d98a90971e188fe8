//! Tidepool checkout engine.
//!
//! This crate is the cart-consistency and purchase core of the storefront.
//! The rendering layer forwards user intents in and renders the view models
//! that come back; everything visual lives elsewhere.
//!
//! # Architecture
//!
//! - [`catalog`] - versioned product/variant index loaded from the catalog
//!   feed, with price/image resolution and variant option matching
//! - [`cart`] - one cart API over two backing stores (anonymous local slot
//!   vs. per-account document collection) with a `watch`-based item feed
//! - [`lineitem`] - joins raw cart entries against the catalog into priced,
//!   display-ready line items
//! - [`checkout`] - the purchase state machine: address, quote, shipping,
//!   tokenization, charge, and confirmation polling
//! - [`commerce`] - HTTP client for the commerce backend (quote / pay /
//!   payment-status)
//! - [`payment`] - seam for the card tokenization provider
//! - [`config`] / [`telemetry`] - environment configuration and tracing setup
//!
//! # Concurrency model
//!
//! All operations are async tasks on one runtime and never block the loop;
//! network calls and tokenization are the only suspension points. Background
//! tasks (the remote cart feed, the confirmation poll) carry explicit
//! cancellation flags and exit silently once cancelled.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod commerce;
pub mod config;
pub mod error;
pub mod lineitem;
pub mod payment;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{CheckoutError, FieldError, Result};
