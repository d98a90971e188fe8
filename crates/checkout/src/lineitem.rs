//! Line-item resolution.
//!
//! Joins raw cart entries against a catalog snapshot into priced,
//! display-ready line items. The entry's own denormalized snapshot (taken
//! at add time) wins; catalog data fills whatever the snapshot lacks, so a
//! cart renders exactly what the shopper added even after a catalog
//! reprice, and stays renderable through a feed outage. An entry with data
//! in neither place still renders, flagged unresolved, priced at zero.

use rust_decimal::Decimal;
use tidepool_core::{DEFAULT_CURRENCY, MergeKey, Money, Quantity};
use tracing::warn;

use crate::cart::CartEntry;
use crate::catalog::{CatalogSnapshot, safe_url};

/// One display-ready cart line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub key: MergeKey,
    pub name: String,
    pub variant_label: Option<String>,
    pub quantity: Quantity,
    /// `None` when neither catalog nor snapshot carries a price; such lines
    /// total zero and block nothing by themselves.
    pub unit_price: Option<Money>,
    pub line_total: Money,
    pub image: Option<String>,
    /// Safe fulfillment link; present only on free access lines.
    pub access_url: Option<String>,
    /// Shipping identifier snapshot carried on the entry, consulted before
    /// the catalog.
    pub shipping_variant_id: Option<String>,
    /// False when the product is absent from the current catalog snapshot.
    pub in_catalog: bool,
}

impl LineItem {
    /// True for lines fulfilled through an access link instead of a charge.
    #[must_use]
    pub fn is_free_access(&self) -> bool {
        self.access_url.is_some()
    }
}

/// A fully resolved cart view.
#[derive(Debug, Clone)]
pub struct ResolvedCart {
    /// Lines that will be billed, in cart order.
    pub paid: Vec<LineItem>,
    /// Free access lines, in cart order.
    pub free: Vec<LineItem>,
    /// Sum of paid line totals.
    pub subtotal: Money,
}

impl ResolvedCart {
    /// True when nothing at all is in the cart.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paid.is_empty() && self.free.is_empty()
    }
}

/// Resolve every entry and split into paid and free lines.
#[must_use]
pub fn resolve_cart(snapshot: &CatalogSnapshot, entries: &[CartEntry]) -> ResolvedCart {
    let mut paid = Vec::new();
    let mut free = Vec::new();

    for entry in entries {
        let item = resolve_entry(snapshot, entry);
        if item.is_free_access() {
            free.push(item);
        } else {
            paid.push(item);
        }
    }

    let currency = paid
        .iter()
        .find_map(|i| i.unit_price.as_ref().map(|p| p.currency.clone()))
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let mut amount = Decimal::ZERO;
    for item in &paid {
        // Unpriced lines total zero in whatever currency; everything else
        // must agree with the cart's currency to be counted
        if item.unit_price.is_none() || item.line_total.currency == currency {
            amount += item.line_total.amount;
        } else {
            warn!(
                line = %item.key,
                expected = %currency,
                found = %item.line_total.currency,
                "mismatched currency, line excluded from subtotal"
            );
        }
    }
    let subtotal = Money::new(amount, currency);

    ResolvedCart {
        paid,
        free,
        subtotal,
    }
}

/// Titles of paid entries that cannot be quoted for shipping.
///
/// A paid entry is unshippable when it has no variant identity or when the
/// catalog cannot resolve its backend shipping identifier. Checkout blocks
/// while this list is non-empty, naming the blocking items.
#[must_use]
pub fn missing_shipping_identity(
    snapshot: &CatalogSnapshot,
    paid_items: &[LineItem],
) -> Vec<String> {
    paid_items
        .iter()
        .filter(|item| shipping_identifier(snapshot, item).is_none())
        .map(|item| item.name.clone())
        .collect()
}

/// The backend shipping identifier for a paid line, when resolvable.
///
/// The entry's own snapshot wins, so a line added while its variant was
/// still in the feed stays shippable after the variant drops out.
#[must_use]
pub fn shipping_identifier(snapshot: &CatalogSnapshot, item: &LineItem) -> Option<String> {
    if let Some(explicit) = item
        .shipping_variant_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        return Some(explicit.to_string());
    }
    let variant_id = item.key.variant_id.as_ref()?;
    snapshot.shipping_identity(&item.key.product_id, variant_id)
}

/// Resolve one entry against the snapshot.
#[must_use]
pub fn resolve_entry(snapshot: &CatalogSnapshot, entry: &CartEntry) -> LineItem {
    let key = entry.merge_key();
    let product = snapshot.product(&key.product_id);
    let variant = key
        .variant_id
        .as_ref()
        .and_then(|vid| snapshot.variant(&key.product_id, vid));

    let name = Some(entry.name.clone())
        .filter(|n| !n.is_empty())
        .or_else(|| product.map(|p| p.name.clone()).filter(|n| !n.is_empty()))
        .unwrap_or_else(|| key.product_id.to_string());

    let variant_label = entry
        .variant_label
        .clone()
        .or_else(|| variant.map(|v| v.label.clone()));

    let unit_price = entry
        .price
        .as_ref()
        .and_then(|p| p.to_money(DEFAULT_CURRENCY))
        .or_else(|| snapshot.resolve_price(&key.product_id, key.variant_id.as_ref()));

    let image = entry
        .image
        .as_deref()
        .and_then(safe_url)
        .or_else(|| snapshot.resolve_image(&key.product_id, key.variant_id.as_ref()));

    let line_total = unit_price.as_ref().map_or_else(
        || Money::new(Decimal::ZERO, DEFAULT_CURRENCY),
        |unit| {
            Money::new(
                unit.amount * Decimal::from(entry.quantity.get()),
                unit.currency.clone(),
            )
        },
    );

    LineItem {
        key,
        name,
        variant_label,
        quantity: entry.quantity,
        unit_price,
        line_total,
        image,
        access_url: entry.safe_access_url(),
        shipping_variant_id: entry.shipping_variant_id.clone(),
        in_catalog: product.is_some(),
    }
}
