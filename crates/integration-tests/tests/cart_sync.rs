//! Cart consistency scenarios across stores, sessions, and identities.

use std::collections::BTreeMap;
use std::sync::Arc;

use tidepool_checkout::cart::{
    CartStore, DocumentStore, KeyValueSlot, MemoryDocumentStore, MemorySlot,
};
use tidepool_checkout::catalog::CatalogSnapshot;
use tidepool_checkout::lineitem::resolve_cart;
use tidepool_core::{AccountId, MergeKey, ProductId, Quantity, VariantId};
use tidepool_integration_tests::{entry, free_entry};

/// Order-insensitive view of a cart: merge key -> quantity.
fn by_key(cart: &CartStore) -> BTreeMap<String, u32> {
    cart.items()
        .iter()
        .map(|e| (e.row_id(), e.quantity.get()))
        .collect()
}

#[tokio::test]
async fn test_merge_sequences_collapse_to_one_row() {
    let cart = CartStore::open(Arc::new(MemorySlot::new())).await;

    // Any sequence of adds with one merge key yields one row, summed and
    // clamped
    for qty in [1, 5, 40, 70, 3] {
        cart.add_or_merge(entry("hoodie", Some("v1"), qty))
            .await
            .expect("add");
    }

    let items = cart.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity.get(), 99);
}

#[tokio::test]
async fn test_out_of_range_quantities_are_clamped_in_storage() {
    let slot = Arc::new(MemorySlot::new());
    let cart = CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await;

    cart.add_or_merge(entry("hoodie", Some("v1"), -3))
        .await
        .expect("add");
    cart.add_or_merge(entry("mug", None, 500)).await.expect("add");

    // What hit the slot is already in range
    let raw = slot.read().await.expect("read").expect("written");
    let stored: serde_json::Value = serde_json::from_str(&raw).expect("json");
    for row in stored.as_array().expect("array") {
        let qty = row["quantity"].as_u64().expect("qty");
        assert!((1..=99).contains(&qty), "stored qty {qty} out of range");
    }
}

#[tokio::test]
async fn test_anonymous_round_trip_preserves_entries() {
    let slot = Arc::new(MemorySlot::new());
    {
        let cart = CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await;
        cart.add_or_merge(entry("hoodie", Some("v1"), 2))
            .await
            .expect("add");
        cart.add_or_merge(entry("mug", None, 1)).await.expect("add");
        cart.add_or_merge(free_entry("zine", "/downloads/zine.pdf"))
            .await
            .expect("add");
    }

    let reloaded = CartStore::open(slot).await;
    let expected: BTreeMap<String, u32> =
        [("hoodie__v1", 2), ("mug", 1), ("zine", 1)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
    assert_eq!(by_key(&reloaded), expected);

    // The free line survives the round trip as free
    assert_eq!(reloaded.free_entries().len(), 1);
}

#[tokio::test]
async fn test_identity_switch_isolates_carts() {
    let slot = Arc::new(MemorySlot::new());
    let remote = Arc::new(MemoryDocumentStore::new());
    let account = AccountId::new("acct-1");

    let cart = CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await;
    cart.add_or_merge(entry("hoodie", Some("v1"), 2))
        .await
        .expect("add");

    cart.sign_in(account.clone(), Arc::clone(&remote) as Arc<dyn DocumentStore>)
        .await
        .expect("sign in");
    cart.add_or_merge(entry("mug", None, 1)).await.expect("add");

    // Each side sees only its own lines
    assert_eq!(by_key(&cart).into_keys().collect::<Vec<_>>(), vec!["mug"]);
    cart.sign_out().await;
    assert_eq!(
        by_key(&cart).into_keys().collect::<Vec<_>>(),
        vec!["hoodie__v1"]
    );

    // Signing back in again finds the account cart still intact
    cart.sign_in(account, Arc::clone(&remote) as Arc<dyn DocumentStore>)
        .await
        .expect("sign in again");
    assert_eq!(by_key(&cart).into_keys().collect::<Vec<_>>(), vec!["mug"]);
}

#[tokio::test]
async fn test_two_devices_converge_through_the_store() {
    let remote = Arc::new(MemoryDocumentStore::new());
    let account = AccountId::new("acct-1");

    let device_a = CartStore::open(Arc::new(MemorySlot::new())).await;
    let device_b = CartStore::open(Arc::new(MemorySlot::new())).await;
    device_a
        .sign_in(account.clone(), Arc::clone(&remote) as Arc<dyn DocumentStore>)
        .await
        .expect("a in");
    device_b
        .sign_in(account, Arc::clone(&remote) as Arc<dyn DocumentStore>)
        .await
        .expect("b in");

    let mut b_feed = device_b.subscribe();
    device_a
        .add_or_merge(entry("hoodie", Some("v1"), 2))
        .await
        .expect("add");

    b_feed.changed().await.expect("feed");
    assert_eq!(by_key(&device_b), by_key(&device_a));

    // A quantity change from B flows back to A the same way
    let mut a_feed = device_a.subscribe();
    let key = MergeKey::new(ProductId::new("hoodie"), Some(VariantId::new("v1")));
    device_b
        .set_quantity(&key, Quantity::clamped(7))
        .await
        .expect("set qty");
    a_feed.changed().await.expect("feed");
    assert_eq!(by_key(&device_a), by_key(&device_b));
}

#[tokio::test]
async fn test_resolution_is_stable_across_snapshots() {
    let snapshot: CatalogSnapshot = {
        let doc = serde_json::from_str(
            r#"[{"id":"hoodie","name":"Tide Hoodie","varients":[
                {"id":"v1","optionParts":["navy","m"],"price":19.5}
            ]}]"#,
        )
        .expect("feed");
        CatalogSnapshot::from_feed(doc)
    };
    let entries = vec![entry("hoodie", Some("v1"), 2)];

    // Resolving the same entries against the same snapshot twice is
    // identical, price included
    let first = resolve_cart(&snapshot, &entries);
    let second = resolve_cart(&snapshot, &entries);
    assert_eq!(first.paid, second.paid);
    assert_eq!(first.subtotal.to_cents(), 3900);
}
