//! Versioned catalog index.
//!
//! The index is loaded once from the published feed and shared as an
//! immutable snapshot. Concurrent first reads coalesce into a single fetch;
//! a failed fetch resolves readers against an empty snapshot rather than
//! erroring, so the storefront renders with unresolved entries instead of
//! going down with the feed.

pub mod feed;
pub mod options;

use std::collections::HashMap;
use std::sync::Arc;

use moka::future::Cache;
use thiserror::Error;
use tidepool_core::{Money, ProductId, VariantId};
use tracing::{debug, warn};

use feed::{FeedDocument, FeedProduct, FeedVariant, variant_currency};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while fetching or decoding the catalog feed.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("feed fetch failed: {0}")]
    Http(String),
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("feed decode failed: {0}")]
    Decode(String),
}

// =============================================================================
// Snapshot types
// =============================================================================

/// A product as indexed from the feed.
#[derive(Debug, Clone)]
pub struct CatalogProduct {
    pub id: ProductId,
    pub name: String,
    /// Product-level price, used when a variant carries none.
    pub base_price: Option<Money>,
    pub image: Option<String>,
    pub images: Vec<String>,
    pub variants: Vec<CatalogVariant>,
    /// Positional labels for variant option groups.
    pub variation_types: Vec<String>,
}

/// A variant as indexed from the feed.
#[derive(Debug, Clone)]
pub struct CatalogVariant {
    pub id: VariantId,
    /// Display label, derived from the label field or the option parts.
    pub label: String,
    /// Positional option values, e.g. `["navy", "xl"]`.
    pub option_parts: Vec<String>,
    pub price: Option<Money>,
    pub image: Option<String>,
    pub images: Vec<String>,
    /// Missing availability in the feed means available.
    pub available: bool,
    pub shipping_variant_id: Option<String>,
}

/// One immutable, internally consistent view of the catalog.
///
/// Every resolution within a single snapshot sees the same data; a reload
/// replaces the whole snapshot atomically rather than mutating it.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    products: HashMap<ProductId, CatalogProduct>,
    /// Variant position within its product, keyed for O(1) lookup.
    variant_index: HashMap<(ProductId, VariantId), usize>,
}

impl CatalogSnapshot {
    /// An empty snapshot; every resolution misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from a decoded feed document.
    ///
    /// Products and variants without an identifier are skipped.
    #[must_use]
    pub fn from_feed(document: FeedDocument) -> Self {
        let mut products = HashMap::new();
        let mut variant_index = HashMap::new();

        for raw in document.into_products() {
            let Some(product) = index_product(raw) else {
                continue;
            };
            for (position, variant) in product.variants.iter().enumerate() {
                variant_index.insert((product.id.clone(), variant.id.clone()), position);
            }
            products.insert(product.id.clone(), product);
        }

        Self {
            products,
            variant_index,
        }
    }

    /// Number of indexed products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// True when no products are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Look up a product by ID.
    #[must_use]
    pub fn product(&self, id: &ProductId) -> Option<&CatalogProduct> {
        self.products.get(id)
    }

    /// Look up a variant within a product.
    #[must_use]
    pub fn variant(&self, product_id: &ProductId, variant_id: &VariantId) -> Option<&CatalogVariant> {
        let position = self
            .variant_index
            .get(&(product_id.clone(), variant_id.clone()))?;
        self.products.get(product_id)?.variants.get(*position)
    }

    /// Resolve the effective unit price for an entry.
    ///
    /// Variant price wins over the product-level price. `None` when neither
    /// side carries a usable price.
    #[must_use]
    pub fn resolve_price(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Option<Money> {
        if let Some(vid) = variant_id
            && let Some(variant) = self.variant(product_id, vid)
            && let Some(price) = &variant.price
        {
            return Some(price.clone());
        }
        self.product(product_id)?.base_price.clone()
    }

    /// Resolve the display image for an entry.
    ///
    /// Precedence: first variant image, variant image field, product image
    /// field, first product image. Unsafe URLs are skipped, not sanitized.
    #[must_use]
    pub fn resolve_image(
        &self,
        product_id: &ProductId,
        variant_id: Option<&VariantId>,
    ) -> Option<String> {
        if let Some(vid) = variant_id
            && let Some(variant) = self.variant(product_id, vid)
        {
            if let Some(url) = variant.images.first().and_then(|u| safe_url(u)) {
                return Some(url);
            }
            if let Some(url) = variant.image.as_deref().and_then(safe_url) {
                return Some(url);
            }
        }

        let product = self.product(product_id)?;
        if let Some(url) = product.image.as_deref().and_then(safe_url) {
            return Some(url);
        }
        product.images.first().and_then(|u| safe_url(u))
    }

    /// Resolve a cart entry's backend shipping identifier.
    ///
    /// Matches the variant by ID, tolerating a leading `#` on either side
    /// (feed IDs have shipped both ways). Returns `None` when the variant is
    /// unknown or carries no shipping identity; such entries block checkout.
    #[must_use]
    pub fn shipping_identity(
        &self,
        product_id: &ProductId,
        variant_id: &VariantId,
    ) -> Option<String> {
        if let Some(variant) = self.variant(product_id, variant_id) {
            return variant.shipping_variant_id.clone();
        }

        // Slow path: feed IDs and stored IDs disagree on the '#' prefix
        let wanted = variant_id.as_str().trim_start_matches('#');
        self.product(product_id)?
            .variants
            .iter()
            .find(|v| v.id.as_str().trim_start_matches('#') == wanted)
            .and_then(|v| v.shipping_variant_id.clone())
    }
}

fn index_product(raw: FeedProduct) -> Option<CatalogProduct> {
    let id = raw.id.trim();
    if id.is_empty() {
        return None;
    }

    let base_price = raw
        .price
        .as_ref()
        .and_then(|p| p.to_money(tidepool_core::DEFAULT_CURRENCY));

    let variants = raw
        .variants
        .into_iter()
        .filter_map(index_variant)
        .collect::<Vec<_>>();

    Some(CatalogProduct {
        id: ProductId::new(id),
        name: raw.name.trim().to_string(),
        base_price,
        image: raw.image,
        images: raw
            .images
            .iter()
            .filter_map(|i| i.url().map(str::to_string))
            .collect(),
        variants,
        variation_types: raw.variation_types,
    })
}

fn index_variant(raw: FeedVariant) -> Option<CatalogVariant> {
    let id = raw.id.trim();
    if id.is_empty() {
        return None;
    }

    let currency = variant_currency(&raw).to_string();
    let price = raw.price.as_ref().and_then(|p| p.to_money(&currency));

    let label = raw
        .variant_label
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if raw.option_parts.is_empty() {
                id.to_string()
            } else {
                raw.option_parts.join(" / ")
            }
        });

    let option_parts = if raw.option_parts.is_empty() {
        label.split(" / ").map(str::to_string).collect()
    } else {
        raw.option_parts
    };

    Some(CatalogVariant {
        id: VariantId::new(id),
        label,
        option_parts,
        price,
        image: raw.image,
        images: raw.images,
        available: raw.available != Some(false),
        shipping_variant_id: raw
            .shipping_variant_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

/// Accept a URL only if it is `https://`, `http://`, or site-relative (`/`).
///
/// Anything else (`javascript:`, `data:`, protocol-relative) is dropped.
pub(crate) fn safe_url(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("https://")
        || lower.starts_with("http://")
        || (trimmed.starts_with('/') && !trimmed.starts_with("//"))
    {
        Some(trimmed.to_string())
    } else {
        None
    }
}

// =============================================================================
// Index
// =============================================================================

/// Handle to the shared catalog snapshot.
///
/// Cloning is cheap; all clones share one cached snapshot. The first
/// [`CatalogIndex::load`] fetches the feed; concurrent callers coalesce into
/// that one fetch and all receive the same `Arc`.
#[derive(Clone)]
pub struct CatalogIndex {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    feed_url: String,
    snapshot: Cache<(), Arc<CatalogSnapshot>>,
}

impl CatalogIndex {
    /// Create an index reading from `feed_url`. Nothing is fetched yet.
    #[must_use]
    pub fn new(http: reqwest::Client, feed_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                feed_url: feed_url.into(),
                snapshot: Cache::builder().max_capacity(1).build(),
            }),
        }
    }

    /// The current snapshot, fetching the feed on first use.
    ///
    /// Never errors: a failed fetch logs and resolves to an empty snapshot
    /// for this call. The failure is not cached, so a later call retries.
    pub async fn load(&self) -> Arc<CatalogSnapshot> {
        let inner = Arc::clone(&self.inner);
        let result = self
            .inner
            .snapshot
            .try_get_with((), async move {
                let snapshot = fetch_feed(&inner.http, &inner.feed_url).await?;
                debug!(products = snapshot.len(), "catalog feed loaded");
                Ok::<_, CatalogError>(Arc::new(snapshot))
            })
            .await;

        match result {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, "catalog feed unavailable, resolving against empty index");
                Arc::new(CatalogSnapshot::empty())
            }
        }
    }

    /// Drop the cached snapshot so the next [`CatalogIndex::load`] refetches.
    ///
    /// Readers holding the old `Arc` keep their consistent view; the swap is
    /// atomic from their perspective.
    pub async fn invalidate(&self) {
        self.inner.snapshot.invalidate(&()).await;
    }

    /// Install a snapshot directly, bypassing the feed fetch.
    pub async fn install(&self, snapshot: CatalogSnapshot) {
        self.inner.snapshot.insert((), Arc::new(snapshot)).await;
    }
}

async fn fetch_feed(http: &reqwest::Client, url: &str) -> Result<CatalogSnapshot, CatalogError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| CatalogError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CatalogError::Status(status.as_u16()));
    }

    let document: FeedDocument = response
        .json()
        .await
        .map_err(|e| CatalogError::Decode(e.to_string()))?;

    Ok(CatalogSnapshot::from_feed(document))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn snapshot_from_json(json: &str) -> CatalogSnapshot {
        let doc: FeedDocument = serde_json::from_str(json).unwrap();
        CatalogSnapshot::from_feed(doc)
    }

    const FEED: &str = r##"[
        {
            "id": "hoodie",
            "name": "Tide Hoodie",
            "price": 4500,
            "image": "/img/hoodie.png",
            "images": ["/img/hoodie-alt.png"],
            "variation_types": ["color", "size"],
            "varients": [
                {
                    "id": "v-navy-m",
                    "optionParts": ["navy", "m"],
                    "price": 4700,
                    "images": ["/img/hoodie-navy.png"],
                    "shippingVariantId": "ship-77"
                },
                {
                    "id": "#v-navy-xl",
                    "optionParts": ["navy", "xl"],
                    "available": false
                }
            ]
        },
        {
            "id": "mug",
            "name": "Reef Mug",
            "price": "$12.00"
        },
        {
            "id": "",
            "name": "no id, skipped"
        }
    ]"##;

    #[test]
    fn test_snapshot_skips_idless_products() {
        let snap = snapshot_from_json(FEED);
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_variant_price_wins_over_product_price() {
        let snap = snapshot_from_json(FEED);
        let pid = ProductId::new("hoodie");
        let vid = VariantId::new("v-navy-m");

        let price = snap.resolve_price(&pid, Some(&vid)).unwrap();
        assert_eq!(price.to_cents(), 4700);

        // No variant -> product-level price
        let price = snap.resolve_price(&pid, None).unwrap();
        assert_eq!(price.to_cents(), 4500);
    }

    #[test]
    fn test_price_falls_back_when_variant_has_none() {
        let snap = snapshot_from_json(FEED);
        let pid = ProductId::new("hoodie");
        let vid = VariantId::new("#v-navy-xl");

        let price = snap.resolve_price(&pid, Some(&vid)).unwrap();
        assert_eq!(price.to_cents(), 4500);
    }

    #[test]
    fn test_image_precedence() {
        let snap = snapshot_from_json(FEED);
        let pid = ProductId::new("hoodie");

        // Variant with its own image list wins
        let vid = VariantId::new("v-navy-m");
        assert_eq!(
            snap.resolve_image(&pid, Some(&vid)).unwrap(),
            "/img/hoodie-navy.png"
        );

        // Variant without images falls through to the product image
        let vid = VariantId::new("#v-navy-xl");
        assert_eq!(
            snap.resolve_image(&pid, Some(&vid)).unwrap(),
            "/img/hoodie.png"
        );

        // No variant at all
        assert_eq!(snap.resolve_image(&pid, None).unwrap(), "/img/hoodie.png");
    }

    #[test]
    fn test_shipping_identity_tolerates_hash_prefix() {
        let snap = snapshot_from_json(FEED);
        let pid = ProductId::new("hoodie");

        assert_eq!(
            snap.shipping_identity(&pid, &VariantId::new("v-navy-m")),
            Some("ship-77".to_string())
        );
        // Stored with '#', feed without (and vice versa)
        assert_eq!(
            snap.shipping_identity(&pid, &VariantId::new("#v-navy-m")),
            Some("ship-77".to_string())
        );
        assert_eq!(
            snap.shipping_identity(&pid, &VariantId::new("v-navy-xl")),
            None
        );
    }

    #[test]
    fn test_availability_defaults_true() {
        let snap = snapshot_from_json(FEED);
        let pid = ProductId::new("hoodie");
        let available = snap
            .variant(&pid, &VariantId::new("v-navy-m"))
            .unwrap()
            .available;
        assert!(available);
        let unavailable = snap
            .variant(&pid, &VariantId::new("#v-navy-xl"))
            .unwrap()
            .available;
        assert!(!unavailable);
    }

    #[test]
    fn test_safe_url() {
        assert_eq!(safe_url("https://x/y.png").as_deref(), Some("https://x/y.png"));
        assert_eq!(safe_url("/img/a.png").as_deref(), Some("/img/a.png"));
        assert_eq!(safe_url("  /img/a.png  ").as_deref(), Some("/img/a.png"));
        assert!(safe_url("javascript:alert(1)").is_none());
        assert!(safe_url("data:image/png;base64,AAAA").is_none());
        assert!(safe_url("//evil.example/x.png").is_none());
        assert!(safe_url("").is_none());
    }

    #[tokio::test]
    async fn test_install_and_invalidate() {
        let index = CatalogIndex::new(reqwest::Client::new(), "https://unused.invalid/feed.json");
        index.install(snapshot_from_json(FEED)).await;

        let snap = index.load().await;
        assert_eq!(snap.len(), 2);

        // Old handle stays consistent after invalidation
        index.invalidate().await;
        assert_eq!(snap.len(), 2);
    }
}
