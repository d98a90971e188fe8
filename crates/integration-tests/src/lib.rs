//! Test harness for the Tidepool checkout engine.
//!
//! Provides scripted stand-ins for the engine's external collaborators
//! (commerce backend, card tokenizer, cart slot) plus a [`Harness`] that
//! wires a full engine together around them. The scenario tests under
//! `tests/` drive the engine exactly the way the rendering layer would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tidepool_checkout::cart::{CartEntry, CartError, CartStore, KeyValueSlot, MemorySlot};
use tidepool_checkout::catalog::CatalogIndex;
use tidepool_checkout::catalog::feed::FeedDocument;
use tidepool_checkout::checkout::{CheckoutFlow, FlowTimings, ShippingAddress};
use tidepool_checkout::commerce::{
    ChargeRequest, ChargeResponse, CommerceApi, CommerceError, ExpiryField, QuoteRequest,
    QuoteResponse, ShippingOption,
};
use tidepool_checkout::payment::{CardToken, CardTokenizer, TokenizeError};
use tidepool_core::{ProductId, Quantity, QuoteId, VariantId};

/// Catalog feed used by most scenarios: one shippable product at $10.00
/// and one product without a shipping identity.
pub const FEED: &str = r#"[
    {
        "id": "hoodie",
        "name": "Tide Hoodie",
        "varients": [
            {
                "id": "v1",
                "optionParts": ["navy", "m"],
                "price": 10.0,
                "shippingVariantId": "ship-77"
            }
        ]
    },
    {
        "id": "mug",
        "name": "Reef Mug",
        "price": 12.0,
        "varients": [
            {"id": "m1", "optionParts": ["white"]}
        ]
    }
]"#;

// =============================================================================
// Scripted commerce backend
// =============================================================================

/// A [`CommerceApi`] whose answers are scripted by the test.
///
/// Status polls pop from a queue; an empty queue answers `pending`.
#[derive(Default)]
pub struct ScriptedCommerce {
    quote: Mutex<Option<QuoteResponse>>,
    charge: Mutex<Option<ChargeResponse>>,
    polls: Mutex<VecDeque<String>>,
    last_quote_request: Mutex<Option<QuoteRequest>>,
    pub quote_calls: AtomicUsize,
    pub charge_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl ScriptedCommerce {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next quote response; `None` means transport failure.
    pub fn script_quote(&self, response: Option<QuoteResponse>) {
        *self.quote.lock().expect("quote lock") = response;
    }

    /// Script the charge response; `None` means transport failure.
    pub fn script_charge(&self, status: &str, message: Option<&str>) {
        *self.charge.lock().expect("charge lock") = Some(ChargeResponse {
            status: status.to_string(),
            payment_id: Some("pay-1".to_string()),
            message: message.map(ToString::to_string),
        });
    }

    /// Make the charge call fail at the transport level.
    pub fn script_charge_failure(&self) {
        *self.charge.lock().expect("charge lock") = None;
    }

    /// Queue one status-poll answer.
    pub fn push_poll(&self, status: &str) {
        self.polls
            .lock()
            .expect("polls lock")
            .push_back(status.to_string());
    }

    /// The items of the most recent quote request.
    #[must_use]
    pub fn last_quote_request(&self) -> Option<QuoteRequest> {
        self.last_quote_request
            .lock()
            .expect("request lock")
            .clone()
    }
}

#[async_trait]
impl CommerceApi for ScriptedCommerce {
    async fn create_quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, CommerceError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_quote_request.lock().expect("request lock") = Some(request.clone());
        self.quote
            .lock()
            .expect("quote lock")
            .clone()
            .ok_or_else(|| CommerceError::Transport("scripted quote failure".to_string()))
    }

    async fn charge(&self, _request: &ChargeRequest) -> Result<ChargeResponse, CommerceError> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        self.charge
            .lock()
            .expect("charge lock")
            .clone()
            .ok_or_else(|| CommerceError::Transport("scripted charge failure".to_string()))
    }

    async fn payment_status(&self, _quote_id: &QuoteId) -> Result<ChargeResponse, CommerceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .polls
            .lock()
            .expect("polls lock")
            .pop_front()
            .unwrap_or_else(|| "pending".to_string());
        Ok(ChargeResponse {
            status,
            payment_id: None,
            message: None,
        })
    }
}

/// Build a quote response with the given `(id, price_cents)` options.
#[must_use]
pub fn quote_response(
    options: &[(&str, i64)],
    expires_at: Option<DateTime<Utc>>,
) -> QuoteResponse {
    QuoteResponse {
        quote_id: QuoteId::new("q-1"),
        shipping_options: options
            .iter()
            .map(|(id, cents)| ShippingOption {
                id: (*id).to_string(),
                label: format!("Shipping {id}"),
                price: None,
                cost_cents: Some(*cents),
                tax_cents: None,
                total_cents: None,
                eta_days: None,
            })
            .collect(),
        tax: None,
        subtotal: None,
        expires_at: expires_at.map(ExpiryField::Rfc3339),
    }
}

// =============================================================================
// Fake tokenizer
// =============================================================================

/// A [`CardTokenizer`] that hands out `tok-1`, or declines once on request.
#[derive(Default)]
pub struct FakeTokenizer {
    decline_next: Mutex<Option<String>>,
    pub attach_calls: AtomicUsize,
    pub tokenize_calls: AtomicUsize,
}

impl FakeTokenizer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next tokenize call fail with a decline message.
    pub fn decline_next(&self, message: &str) {
        *self.decline_next.lock().expect("decline lock") = Some(message.to_string());
    }
}

#[async_trait]
impl CardTokenizer for FakeTokenizer {
    async fn attach(&self) -> Result<(), TokenizeError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn tokenize(&self) -> Result<CardToken, TokenizeError> {
        self.tokenize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.decline_next.lock().expect("decline lock").take() {
            return Err(TokenizeError::Declined(message));
        }
        Ok(CardToken::bare("tok-1"))
    }
}

// =============================================================================
// Counting cart slot
// =============================================================================

/// A [`KeyValueSlot`] that counts `clear` calls.
#[derive(Default)]
pub struct CountingSlot {
    inner: MemorySlot,
    pub clear_calls: AtomicUsize,
}

impl CountingSlot {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueSlot for CountingSlot {
    async fn read(&self) -> Result<Option<String>, CartError> {
        self.inner.read().await
    }

    async fn write(&self, value: &str) -> Result<(), CartError> {
        self.inner.write(value).await
    }

    async fn clear(&self) -> Result<(), CartError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.clear().await
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A fully wired engine around scripted collaborators.
pub struct Harness {
    pub flow: CheckoutFlow,
    pub cart: Arc<CartStore>,
    pub commerce: Arc<ScriptedCommerce>,
    pub tokenizer: Arc<FakeTokenizer>,
    pub slot: Arc<CountingSlot>,
    pub catalog: CatalogIndex,
}

impl Harness {
    /// Build an engine over `feed_json` with default timings.
    pub async fn over_feed(feed_json: &str) -> Self {
        let slot = CountingSlot::new();
        let cart = Arc::new(CartStore::open(Arc::clone(&slot) as Arc<dyn KeyValueSlot>).await);
        let commerce = ScriptedCommerce::new();
        let tokenizer = FakeTokenizer::new();

        let catalog = CatalogIndex::new(
            reqwest::Client::new(),
            "https://feed.invalid/products.json",
        );
        let document: FeedDocument =
            serde_json::from_str(feed_json).expect("feed fixture parses");
        catalog
            .install(tidepool_checkout::catalog::CatalogSnapshot::from_feed(document))
            .await;

        let flow = CheckoutFlow::new(
            Arc::clone(&commerce) as Arc<dyn CommerceApi>,
            Arc::clone(&tokenizer) as Arc<dyn CardTokenizer>,
            catalog.clone(),
            Arc::clone(&cart),
            FlowTimings::default(),
        );

        Self {
            flow,
            cart,
            commerce,
            tokenizer,
            slot,
            catalog,
        }
    }

    /// Put one shippable hoodie line (qty 2, $10.00 each) in the cart.
    pub async fn stock_hoodie(&self, qty: i64) {
        self.cart
            .add_or_merge(entry("hoodie", Some("v1"), qty))
            .await
            .expect("cart add");
    }
}

/// An identity-only cart entry.
#[must_use]
pub fn entry(product: &str, variant: Option<&str>, qty: i64) -> CartEntry {
    CartEntry::new(
        ProductId::new(product),
        variant.map(VariantId::new),
        Quantity::clamped(qty),
    )
}

/// A free access-link entry.
#[must_use]
pub fn free_entry(product: &str, url: &str) -> CartEntry {
    let mut e = entry(product, None, 1);
    e.access_url = Some(url.to_string());
    e
}

/// A valid US shipping address.
#[must_use]
pub fn us_address() -> ShippingAddress {
    ShippingAddress {
        name: "Pat Doe".to_string(),
        email: "pat@example.com".to_string(),
        line1: "123 Shore Dr".to_string(),
        line2: String::new(),
        city: "Santa Cruz".to_string(),
        state: "CA".to_string(),
        zip: "95060".to_string(),
        country: "US".to_string(),
        phone: String::new(),
    }
}
