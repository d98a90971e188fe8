//! Durable cart state.
//!
//! One cart API over two backing stores: an anonymous local slot (one JSON
//! blob) and a per-account remote document collection (one document per
//! line). Signing in switches stores without merging; the anonymous cart
//! stays in its slot and reappears on sign-out.
//!
//! Readers subscribe to a `watch` channel and always see the latest
//! published entry list; mutations publish eagerly, and an account-mode
//! background feed republishes on remote change.

pub mod backend;
pub mod entry;
pub mod store;

pub use backend::{CartError, DocumentStore, KeyValueSlot, MemoryDocumentStore, MemorySlot};
pub use entry::CartEntry;
pub use store::CartStore;
