//! Cart persistence seams.
//!
//! Two traits: [`KeyValueSlot`] for the anonymous cart (one JSON blob under
//! one key) and [`DocumentStore`] for per-account carts (one document per
//! line, keyed by the merge-key row ID). Production wires these to the
//! host's storage; the in-memory implementations here back tests and demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tidepool_core::AccountId;
use tokio::sync::watch;

/// Errors from cart persistence.
#[derive(Debug, Error)]
pub enum CartError {
    /// The backing store failed; callers degrade rather than crash.
    #[error("backend: {0}")]
    Backend(String),
    /// A stored row no longer decodes as a cart entry.
    #[error("decode: {0}")]
    Decode(String),
}

/// One replaceable JSON blob. Backs the anonymous cart.
#[async_trait]
pub trait KeyValueSlot: Send + Sync {
    /// Read the stored blob, `None` when nothing was ever written.
    async fn read(&self) -> Result<Option<String>, CartError>;
    /// Replace the stored blob.
    async fn write(&self, value: &str) -> Result<(), CartError>;
    /// Remove the stored blob.
    async fn clear(&self) -> Result<(), CartError>;
}

/// A per-account document collection. Backs signed-in carts.
///
/// Row IDs are the merge-key row IDs, so concurrent adds of the same line
/// land on the same document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents in the account's cart collection, as `(row_id, body)`.
    async fn list(&self, account: &AccountId) -> Result<Vec<(String, Value)>, CartError>;

    /// One document by row ID.
    async fn read(&self, account: &AccountId, row_id: &str) -> Result<Option<Value>, CartError>;

    /// Create or replace one document.
    async fn upsert(
        &self,
        account: &AccountId,
        row_id: &str,
        body: Value,
    ) -> Result<(), CartError>;

    /// Merge `fields` into an existing document, leaving other fields
    /// untouched. Returns `false` when the document does not exist.
    async fn patch(
        &self,
        account: &AccountId,
        row_id: &str,
        fields: Value,
    ) -> Result<bool, CartError>;

    /// Delete one document. Deleting a missing document is not an error.
    async fn delete(&self, account: &AccountId, row_id: &str) -> Result<(), CartError>;

    /// Change notifications for the account's collection.
    ///
    /// The receiver observes a revision counter that bumps on every write.
    /// The cart's background feed re-lists on each bump.
    fn changes(&self, account: &AccountId) -> watch::Receiver<u64>;
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// In-memory [`KeyValueSlot`].
#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueSlot for MemorySlot {
    async fn read(&self) -> Result<Option<String>, CartError> {
        Ok(self
            .value
            .lock()
            .map_err(|e| CartError::Backend(e.to_string()))?
            .clone())
    }

    async fn write(&self, value: &str) -> Result<(), CartError> {
        *self
            .value
            .lock()
            .map_err(|e| CartError::Backend(e.to_string()))? = Some(value.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CartError> {
        *self
            .value
            .lock()
            .map_err(|e| CartError::Backend(e.to_string()))? = None;
        Ok(())
    }
}

#[derive(Default)]
struct AccountDocs {
    rows: BTreeMap<String, Value>,
    revision: u64,
    notify: Option<watch::Sender<u64>>,
}

/// In-memory [`DocumentStore`] with working change notifications.
#[derive(Default)]
pub struct MemoryDocumentStore {
    accounts: Mutex<HashMap<AccountId, AccountDocs>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_account<T>(
        &self,
        account: &AccountId,
        f: impl FnOnce(&mut AccountDocs) -> T,
    ) -> Result<T, CartError> {
        let mut accounts = self
            .accounts
            .lock()
            .map_err(|e| CartError::Backend(e.to_string()))?;
        Ok(f(accounts.entry(account.clone()).or_default()))
    }

    fn bump(docs: &mut AccountDocs) {
        docs.revision += 1;
        if let Some(notify) = &docs.notify {
            let _ = notify.send(docs.revision);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list(&self, account: &AccountId) -> Result<Vec<(String, Value)>, CartError> {
        self.with_account(account, |docs| {
            docs.rows
                .iter()
                .map(|(id, body)| (id.clone(), body.clone()))
                .collect()
        })
    }

    async fn read(&self, account: &AccountId, row_id: &str) -> Result<Option<Value>, CartError> {
        self.with_account(account, |docs| docs.rows.get(row_id).cloned())
    }

    async fn upsert(
        &self,
        account: &AccountId,
        row_id: &str,
        body: Value,
    ) -> Result<(), CartError> {
        self.with_account(account, |docs| {
            docs.rows.insert(row_id.to_string(), body);
            Self::bump(docs);
        })
    }

    async fn patch(
        &self,
        account: &AccountId,
        row_id: &str,
        fields: Value,
    ) -> Result<bool, CartError> {
        self.with_account(account, |docs| {
            let Some(body) = docs.rows.get_mut(row_id) else {
                return false;
            };
            if let (Some(target), Value::Object(updates)) = (body.as_object_mut(), fields) {
                for (key, value) in updates {
                    target.insert(key, value);
                }
            }
            Self::bump(docs);
            true
        })
    }

    async fn delete(&self, account: &AccountId, row_id: &str) -> Result<(), CartError> {
        self.with_account(account, |docs| {
            docs.rows.remove(row_id);
            Self::bump(docs);
        })
    }

    fn changes(&self, account: &AccountId) -> watch::Receiver<u64> {
        let result = self.with_account(account, |docs| {
            if let Some(notify) = &docs.notify {
                notify.subscribe()
            } else {
                let (tx, rx) = watch::channel(docs.revision);
                docs.notify = Some(tx);
                rx
            }
        });
        // A poisoned lock only happens after a panic elsewhere; hand back a
        // closed receiver so the feed task exits instead of spinning.
        result.unwrap_or_else(|_| watch::channel(0).1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_slot_round_trip() {
        let slot = MemorySlot::new();
        assert_eq!(slot.read().await.unwrap(), None);

        slot.write("[1,2]").await.unwrap();
        assert_eq!(slot.read().await.unwrap().as_deref(), Some("[1,2]"));

        slot.clear().await.unwrap();
        assert_eq!(slot.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_document_store_upsert_and_delete() {
        let store = MemoryDocumentStore::new();
        let account = AccountId::new("acct-1");

        store
            .upsert(&account, "hoodie__v1", json!({"qty": 2}))
            .await
            .unwrap();
        store
            .upsert(&account, "mug", json!({"qty": 1}))
            .await
            .unwrap();

        let rows = store.list(&account).await.unwrap();
        assert_eq!(rows.len(), 2);

        store.delete(&account, "mug").await.unwrap();
        // Deleting again is a no-op
        store.delete(&account, "mug").await.unwrap();
        assert_eq!(store.list(&account).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_patch_merges_without_clobbering() {
        let store = MemoryDocumentStore::new();
        let account = AccountId::new("acct-1");

        store
            .upsert(&account, "hoodie", json!({"qty": 2, "name": "Tide Hoodie"}))
            .await
            .unwrap();

        let hit = store
            .patch(&account, "hoodie", json!({"qty": 7}))
            .await
            .unwrap();
        assert!(hit);

        let body = store.read(&account, "hoodie").await.unwrap().unwrap();
        assert_eq!(body["qty"], 7);
        assert_eq!(body["name"], "Tide Hoodie");

        // Patching an absent row reports a miss and writes nothing
        assert!(!store.patch(&account, "mug", json!({"qty": 1})).await.unwrap());
        assert!(store.read(&account, "mug").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_changes_notify_on_write() {
        let store = MemoryDocumentStore::new();
        let account = AccountId::new("acct-1");

        let mut rx = store.changes(&account);
        let first = *rx.borrow();

        store
            .upsert(&account, "hoodie", json!({"qty": 1}))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert!(*rx.borrow() > first);
    }

    #[tokio::test]
    async fn test_accounts_are_isolated() {
        let store = MemoryDocumentStore::new();
        let a = AccountId::new("a");
        let b = AccountId::new("b");

        store.upsert(&a, "hoodie", json!({})).await.unwrap();
        assert!(store.list(&b).await.unwrap().is_empty());
    }
}
