//! The cart store: one API, two backing modes.

use std::sync::Arc;

use chrono::Utc;
use tidepool_core::{AccountId, MergeKey, Quantity};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::{CartError, DocumentStore, KeyValueSlot};
use super::entry::CartEntry;

enum Mode {
    Anonymous,
    Account {
        account: AccountId,
        store: Arc<dyn DocumentStore>,
        feed: JoinHandle<()>,
    },
}

/// Durable cart with a `watch`-based item feed.
///
/// Starts in anonymous mode, persisting to the local slot. [`sign_in`]
/// switches to the account's document collection and starts a background
/// feed that republishes on remote change; [`sign_out`] reverts to the
/// anonymous slot, whose contents were left untouched the whole time. The
/// two carts are never merged automatically.
///
/// [`sign_in`]: CartStore::sign_in
/// [`sign_out`]: CartStore::sign_out
pub struct CartStore {
    slot: Arc<dyn KeyValueSlot>,
    entries: watch::Sender<Vec<CartEntry>>,
    mode: Mutex<Mode>,
}

impl CartStore {
    /// Open the cart in anonymous mode, loading whatever the slot holds.
    ///
    /// A slot read or decode failure degrades to an empty cart; the slot is
    /// not cleared, so a later fix can still recover it.
    pub async fn open(slot: Arc<dyn KeyValueSlot>) -> Self {
        let (entries, _) = watch::channel(Vec::new());
        let store = Self {
            slot,
            entries,
            mode: Mutex::new(Mode::Anonymous),
        };
        let items = store.load_slot().await;
        store.entries.send_replace(items);
        store
    }

    /// Subscribe to the entry list. The receiver always holds the latest
    /// published state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<CartEntry>> {
        self.entries.subscribe()
    }

    /// The current entry list.
    #[must_use]
    pub fn items(&self) -> Vec<CartEntry> {
        self.entries.borrow().clone()
    }

    /// Total units across all lines.
    #[must_use]
    pub fn unit_count(&self) -> u32 {
        self.entries
            .borrow()
            .iter()
            .map(|e| e.quantity.get())
            .sum()
    }

    /// Entries that will be billed at checkout.
    #[must_use]
    pub fn paid_entries(&self) -> Vec<CartEntry> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| !e.is_free_access())
            .cloned()
            .collect()
    }

    /// Entries fulfilled through an access link, never billed.
    #[must_use]
    pub fn free_entries(&self) -> Vec<CartEntry> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.is_free_access())
            .cloned()
            .collect()
    }

    /// Add an entry, folding it into an existing line with the same merge
    /// key. An entry without a product ID is dropped.
    ///
    /// # Errors
    ///
    /// Returns `CartError` when the backing store rejects the write; the
    /// published view is left at its previous state.
    pub async fn add_or_merge(&self, entry: CartEntry) -> Result<(), CartError> {
        if entry.product_id.is_empty() {
            warn!("dropping cart add with empty product id");
            return Ok(());
        }

        let mode = self.mode.lock().await;
        match &*mode {
            Mode::Anonymous => {
                let mut items = self.items();
                let key = entry.merge_key();
                match items.iter_mut().find(|e| e.merge_key() == key) {
                    Some(existing) => existing.merge_from(&entry),
                    None => items.push(entry),
                }
                self.persist_anonymous(&items).await?;
                self.entries.send_replace(items);
            }
            Mode::Account { account, store, .. } => {
                let row_id = entry.row_id();
                let merged = match store.read(account, &row_id).await? {
                    Some(body) => match serde_json::from_value::<CartEntry>(body) {
                        Ok(mut existing) => {
                            existing.merge_from(&entry);
                            existing
                        }
                        Err(error) => {
                            warn!(%error, %row_id, "existing cart row undecodable, replacing");
                            entry
                        }
                    },
                    None => entry,
                };
                let body = serde_json::to_value(&merged)
                    .map_err(|e| CartError::Decode(e.to_string()))?;
                store.upsert(account, &row_id, body).await?;
                self.republish_account(account, store.as_ref()).await;
            }
        }
        Ok(())
    }

    /// Set the quantity on an existing line. Unknown lines are a no-op.
    ///
    /// Account mode patches just the quantity and timestamp, so a
    /// concurrent change to the row's snapshot fields is not clobbered.
    ///
    /// # Errors
    ///
    /// Returns `CartError` when the backing store rejects the write.
    pub async fn set_quantity(&self, key: &MergeKey, quantity: Quantity) -> Result<(), CartError> {
        let mode = self.mode.lock().await;
        match &*mode {
            Mode::Anonymous => {
                let mut items = self.items();
                let Some(existing) = items.iter_mut().find(|e| &e.merge_key() == key) else {
                    debug!(%key, "set_quantity on absent line, ignoring");
                    return Ok(());
                };
                existing.quantity = quantity;
                existing.updated_at = Some(Utc::now());
                self.persist_anonymous(&items).await?;
                self.entries.send_replace(items);
            }
            Mode::Account { account, store, .. } => {
                let fields = serde_json::json!({
                    "quantity": quantity,
                    "updatedAt": Utc::now(),
                });
                if !store.patch(account, &key.row_id(), fields).await? {
                    debug!(%key, "set_quantity on absent line, ignoring");
                    return Ok(());
                }
                self.republish_account(account, store.as_ref()).await;
            }
        }
        Ok(())
    }

    /// Remove a line. Removing an absent line is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `CartError` when the backing store rejects the delete.
    pub async fn remove(&self, key: &MergeKey) -> Result<(), CartError> {
        let mode = self.mode.lock().await;
        match &*mode {
            Mode::Anonymous => {
                let mut items = self.items();
                items.retain(|e| &e.merge_key() != key);
                self.persist_anonymous(&items).await?;
                self.entries.send_replace(items);
            }
            Mode::Account { account, store, .. } => {
                store.delete(account, &key.row_id()).await?;
                self.republish_account(account, store.as_ref()).await;
            }
        }
        Ok(())
    }

    /// Empty the cart.
    ///
    /// In account mode this deletes each row individually; a row that fails
    /// to delete is logged and left behind rather than failing the whole
    /// clear.
    ///
    /// # Errors
    ///
    /// Returns `CartError` only for anonymous-slot failures; account-mode
    /// row failures are absorbed.
    pub async fn clear(&self) -> Result<(), CartError> {
        let mode = self.mode.lock().await;
        match &*mode {
            Mode::Anonymous => {
                self.slot.clear().await?;
                self.entries.send_replace(Vec::new());
            }
            Mode::Account { account, store, .. } => {
                let rows = match store.list(account).await {
                    Ok(rows) => rows,
                    Err(error) => {
                        warn!(%error, "cart clear could not list rows");
                        return Ok(());
                    }
                };
                for (row_id, _) in rows {
                    if let Err(error) = store.delete(account, &row_id).await {
                        warn!(%error, %row_id, "cart clear left a row behind");
                    }
                }
                self.republish_account(account, store.as_ref()).await;
            }
        }
        Ok(())
    }

    /// Switch to the account's remote cart.
    ///
    /// The anonymous slot is left as-is (no merge); the published view
    /// becomes the account's rows, and a background feed keeps it current.
    ///
    /// # Errors
    ///
    /// Returns `CartError` when the initial row listing fails; the store
    /// stays in its previous mode.
    pub async fn sign_in(
        &self,
        account: AccountId,
        store: Arc<dyn DocumentStore>,
    ) -> Result<(), CartError> {
        let mut mode = self.mode.lock().await;

        let items = list_account(&account, store.as_ref()).await?;

        if let Mode::Account { feed, .. } = &*mode {
            feed.abort();
        }
        self.entries.send_replace(items);
        let feed = spawn_feed(
            account.clone(),
            Arc::clone(&store),
            Arc::clone(&self.slot),
            self.entries.clone(),
        );
        *mode = Mode::Account {
            account,
            store,
            feed,
        };
        Ok(())
    }

    /// Revert to the anonymous slot, stopping the remote feed.
    pub async fn sign_out(&self) {
        let mut mode = self.mode.lock().await;
        if let Mode::Account { feed, .. } = &*mode {
            feed.abort();
        }
        *mode = Mode::Anonymous;
        let items = self.load_slot().await;
        self.entries.send_replace(items);
    }

    async fn load_slot(&self) -> Vec<CartEntry> {
        read_slot(self.slot.as_ref()).await
    }

    async fn persist_anonymous(&self, items: &[CartEntry]) -> Result<(), CartError> {
        let raw = serde_json::to_string(items).map_err(|e| CartError::Decode(e.to_string()))?;
        self.slot.write(&raw).await
    }

    async fn republish_account(&self, account: &AccountId, store: &dyn DocumentStore) {
        match list_account(account, store).await {
            Ok(items) => {
                self.entries.send_replace(items);
            }
            Err(error) => warn!(%error, "cart republish failed, keeping last view"),
        }
    }
}

impl Drop for CartStore {
    fn drop(&mut self) {
        if let Ok(mode) = self.mode.try_lock()
            && let Mode::Account { feed, .. } = &*mode
        {
            feed.abort();
        }
    }
}

async fn read_slot(slot: &dyn KeyValueSlot) -> Vec<CartEntry> {
    match slot.read().await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(error) => {
                warn!(%error, "stored cart undecodable, starting empty");
                Vec::new()
            }
        },
        Ok(None) => Vec::new(),
        Err(error) => {
            warn!(%error, "cart slot unreadable, starting empty");
            Vec::new()
        }
    }
}

/// List and decode the account's rows, skipping undecodable ones.
async fn list_account(
    account: &AccountId,
    store: &dyn DocumentStore,
) -> Result<Vec<CartEntry>, CartError> {
    let rows = store.list(account).await?;
    let mut items = Vec::with_capacity(rows.len());
    for (row_id, body) in rows {
        match serde_json::from_value::<CartEntry>(body) {
            Ok(entry) => items.push(entry),
            Err(error) => warn!(%error, %row_id, "skipping undecodable cart row"),
        }
    }
    Ok(items)
}

fn spawn_feed(
    account: AccountId,
    store: Arc<dyn DocumentStore>,
    slot: Arc<dyn KeyValueSlot>,
    publisher: watch::Sender<Vec<CartEntry>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut changes = store.changes(&account);
        loop {
            if changes.changed().await.is_err() {
                break;
            }
            match list_account(&account, store.as_ref()).await {
                Ok(items) => {
                    publisher.send_replace(items);
                }
                // A false "cart is empty" is worse than a stale one; show
                // the local snapshot until the subscription recovers
                Err(error) => {
                    warn!(%error, "cart feed refresh failed, presenting local snapshot");
                    publisher.send_replace(read_slot(slot.as_ref()).await);
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::backend::{MemoryDocumentStore, MemorySlot};
    use tidepool_core::{ProductId, VariantId};

    fn entry(product: &str, variant: Option<&str>, qty: i64) -> CartEntry {
        CartEntry::new(
            ProductId::new(product),
            variant.map(VariantId::new),
            Quantity::clamped(qty),
        )
    }

    #[tokio::test]
    async fn test_add_merges_same_key() {
        let cart = CartStore::open(Arc::new(MemorySlot::new())).await;

        cart.add_or_merge(entry("hoodie", Some("v1"), 2)).await.unwrap();
        cart.add_or_merge(entry("hoodie", Some("v1"), 3)).await.unwrap();
        cart.add_or_merge(entry("hoodie", Some("v2"), 1)).await.unwrap();

        let items = cart.items();
        assert_eq!(items.len(), 2);
        let merged = items.iter().find(|e| e.row_id() == "hoodie__v1").unwrap();
        assert_eq!(merged.quantity.get(), 5);
        assert_eq!(cart.unit_count(), 6);
    }

    #[tokio::test]
    async fn test_anonymous_cart_survives_reopen() {
        let slot = Arc::new(MemorySlot::new());
        {
            let cart = CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await;
            cart.add_or_merge(entry("hoodie", None, 2)).await.unwrap();
        }

        let cart = CartStore::open(slot).await;
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.unit_count(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_slot_degrades_to_empty() {
        let slot = Arc::new(MemorySlot::new());
        slot.write("not json at all").await.unwrap();

        let cart = CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await;
        assert!(cart.items().is_empty());

        // The slot was not cleared by the failed load
        assert!(slot.read().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_set_quantity_and_remove() {
        let cart = CartStore::open(Arc::new(MemorySlot::new())).await;
        cart.add_or_merge(entry("hoodie", Some("v1"), 2)).await.unwrap();

        let key = MergeKey::new(ProductId::new("hoodie"), Some(VariantId::new("v1")));
        cart.set_quantity(&key, Quantity::clamped(7)).await.unwrap();
        assert_eq!(cart.unit_count(), 7);

        // Absent line is a no-op
        let absent = MergeKey::new(ProductId::new("mug"), None);
        cart.set_quantity(&absent, Quantity::ONE).await.unwrap();
        assert_eq!(cart.items().len(), 1);

        cart.remove(&key).await.unwrap();
        assert!(cart.items().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_does_not_merge_anonymous_cart() {
        let slot = Arc::new(MemorySlot::new());
        let cart = CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await;
        cart.add_or_merge(entry("hoodie", None, 2)).await.unwrap();

        let remote = Arc::new(MemoryDocumentStore::new());
        cart.sign_in(AccountId::new("acct-1"), Arc::clone(&remote) as Arc<dyn DocumentStore>)
            .await
            .unwrap();

        // Account cart is empty; the anonymous line did not follow
        assert!(cart.items().is_empty());

        cart.add_or_merge(entry("mug", None, 1)).await.unwrap();
        assert_eq!(cart.items().len(), 1);

        // Signing out restores the untouched anonymous cart
        cart.sign_out().await;
        let items = cart.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id.as_str(), "hoodie");
    }

    #[tokio::test]
    async fn test_remote_change_reaches_subscribers() {
        let cart = CartStore::open(Arc::new(MemorySlot::new())).await;
        let remote = Arc::new(MemoryDocumentStore::new());
        let account = AccountId::new("acct-1");

        cart.sign_in(account.clone(), Arc::clone(&remote) as Arc<dyn DocumentStore>)
            .await
            .unwrap();
        let mut rx = cart.subscribe();

        // Another device writes directly to the account's collection
        let body = serde_json::to_value(entry("hoodie", Some("v1"), 3)).unwrap();
        remote.upsert(&account, "hoodie__v1", body).await.unwrap();

        rx.changed().await.unwrap();
        let items = rx.borrow().clone();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity.get(), 3);
    }

    #[tokio::test]
    async fn test_account_add_merges_into_existing_row() {
        let cart = CartStore::open(Arc::new(MemorySlot::new())).await;
        let remote = Arc::new(MemoryDocumentStore::new());
        cart.sign_in(AccountId::new("acct-1"), Arc::clone(&remote) as Arc<dyn DocumentStore>)
            .await
            .unwrap();

        cart.add_or_merge(entry("hoodie", Some("v1"), 60)).await.unwrap();
        cart.add_or_merge(entry("hoodie", Some("v1"), 60)).await.unwrap();

        let items = cart.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity.get(), 99);
    }

    #[tokio::test]
    async fn test_account_set_quantity_patches_row_in_place() {
        let cart = CartStore::open(Arc::new(MemorySlot::new())).await;
        let remote = Arc::new(MemoryDocumentStore::new());
        let account = AccountId::new("acct-1");
        cart.sign_in(account.clone(), Arc::clone(&remote) as Arc<dyn DocumentStore>)
            .await
            .unwrap();

        // Row written by another device, with snapshot fields and an old
        // timestamp
        let body = serde_json::json!({
            "productId": "hoodie",
            "variantId": "v1",
            "quantity": 2,
            "name": "Tide Hoodie",
            "updatedAt": "2024-01-01T00:00:00Z",
        });
        remote.upsert(&account, "hoodie__v1", body).await.unwrap();

        let key = MergeKey::new(ProductId::new("hoodie"), Some(VariantId::new("v1")));
        cart.set_quantity(&key, Quantity::clamped(7)).await.unwrap();

        let row = remote.read(&account, "hoodie__v1").await.unwrap().unwrap();
        assert_eq!(row["quantity"], 7);
        // Snapshot fields untouched, timestamp moved
        assert_eq!(row["name"], "Tide Hoodie");
        assert_ne!(row["updatedAt"], "2024-01-01T00:00:00Z");
    }

    struct FlakyStore {
        inner: MemoryDocumentStore,
        fail_lists: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl DocumentStore for FlakyStore {
        async fn list(
            &self,
            account: &AccountId,
        ) -> Result<Vec<(String, serde_json::Value)>, CartError> {
            if self.fail_lists.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CartError::Backend("listing unavailable".to_string()));
            }
            self.inner.list(account).await
        }

        async fn read(
            &self,
            account: &AccountId,
            row_id: &str,
        ) -> Result<Option<serde_json::Value>, CartError> {
            self.inner.read(account, row_id).await
        }

        async fn upsert(
            &self,
            account: &AccountId,
            row_id: &str,
            body: serde_json::Value,
        ) -> Result<(), CartError> {
            self.inner.upsert(account, row_id, body).await
        }

        async fn patch(
            &self,
            account: &AccountId,
            row_id: &str,
            fields: serde_json::Value,
        ) -> Result<bool, CartError> {
            self.inner.patch(account, row_id, fields).await
        }

        async fn delete(&self, account: &AccountId, row_id: &str) -> Result<(), CartError> {
            self.inner.delete(account, row_id).await
        }

        fn changes(&self, account: &AccountId) -> watch::Receiver<u64> {
            self.inner.changes(account)
        }
    }

    #[tokio::test]
    async fn test_feed_failure_falls_back_to_local_snapshot() {
        let slot = Arc::new(MemorySlot::new());
        let cart = CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await;
        cart.add_or_merge(entry("hoodie", None, 2)).await.unwrap();

        let remote = Arc::new(FlakyStore {
            inner: MemoryDocumentStore::new(),
            fail_lists: std::sync::atomic::AtomicBool::new(false),
        });
        let account = AccountId::new("acct-1");
        cart.sign_in(account.clone(), Arc::clone(&remote) as Arc<dyn DocumentStore>)
            .await
            .unwrap();
        assert!(cart.items().is_empty());

        let mut rx = cart.subscribe();
        remote
            .fail_lists
            .store(true, std::sync::atomic::Ordering::SeqCst);
        // A write still notifies; the failed re-list falls back
        let body = serde_json::to_value(entry("mug", None, 1)).unwrap();
        remote.inner.upsert(&account, "mug", body).await.unwrap();

        rx.changed().await.unwrap();
        let items = rx.borrow().clone();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id.as_str(), "hoodie");
    }

    #[tokio::test]
    async fn test_clear_account_cart_deletes_rows() {
        let cart = CartStore::open(Arc::new(MemorySlot::new())).await;
        let remote = Arc::new(MemoryDocumentStore::new());
        let account = AccountId::new("acct-1");
        cart.sign_in(account.clone(), Arc::clone(&remote) as Arc<dyn DocumentStore>)
            .await
            .unwrap();

        cart.add_or_merge(entry("hoodie", None, 1)).await.unwrap();
        cart.add_or_merge(entry("mug", None, 1)).await.unwrap();
        cart.clear().await.unwrap();

        assert!(cart.items().is_empty());
        assert!(remote.list(&account).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paid_and_free_split() {
        let cart = CartStore::open(Arc::new(MemorySlot::new())).await;
        let mut free = entry("zine", None, 1);
        free.access_url = Some("/downloads/zine.pdf".to_string());

        cart.add_or_merge(entry("hoodie", Some("v1"), 1)).await.unwrap();
        cart.add_or_merge(free).await.unwrap();

        assert_eq!(cart.paid_entries().len(), 1);
        assert_eq!(cart.free_entries().len(), 1);
        assert_eq!(cart.paid_entries()[0].product_id.as_str(), "hoodie");
    }
}
