//! Persisted cart entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidepool_core::{MergeKey, ProductId, Quantity, VariantId};

use crate::catalog::feed::PriceField;
use crate::catalog::safe_url;

/// One persisted cart line.
///
/// Besides its identity (`product_id`, `variant_id`) an entry carries a
/// denormalized snapshot of what the shopper saw when adding: name, price,
/// image. The snapshot keeps the cart renderable when the catalog feed is
/// down; the line-item resolver prefers live catalog data when available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartEntry {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<VariantId>,
    #[serde(default)]
    pub quantity: Quantity,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_label: Option<String>,
    /// Price snapshot in whatever shape the source carried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<PriceField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Fulfillment link for items delivered at no charge. An entry with a
    /// safe access URL is never billed, whatever its price snapshot says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    /// Backend shipping identifier snapshot, taken at add time. Keeps the
    /// line shippable even after its variant drops from the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<DateTime<Utc>>,
    /// Mutated on every quantity change or merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CartEntry {
    /// Create an entry with identity and quantity only; snapshot fields
    /// start empty.
    #[must_use]
    pub fn new(
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: Quantity,
    ) -> Self {
        let now = Utc::now();
        Self {
            product_id,
            variant_id: variant_id.filter(|v| !v.is_empty()),
            quantity,
            name: String::new(),
            variant_label: None,
            price: None,
            image: None,
            access_url: None,
            shipping_variant_id: None,
            added_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// The logical line identity.
    #[must_use]
    pub fn merge_key(&self) -> MergeKey {
        MergeKey::new(self.product_id.clone(), self.variant_id.clone())
    }

    /// Deterministic persisted row ID, shared with the remote store.
    #[must_use]
    pub fn row_id(&self) -> String {
        self.merge_key().row_id()
    }

    /// The access URL if it passes the scheme check, else `None`.
    #[must_use]
    pub fn safe_access_url(&self) -> Option<String> {
        self.access_url.as_deref().and_then(safe_url)
    }

    /// True for entries fulfilled through an access link instead of a charge.
    #[must_use]
    pub fn is_free_access(&self) -> bool {
        self.safe_access_url().is_some()
    }

    /// Fold another entry with the same merge key into this one.
    ///
    /// Quantities sum (clamped); the incoming snapshot wins field-by-field
    /// where it is present, except that an access URL on either side is
    /// kept - a line known to be free stays free.
    pub fn merge_from(&mut self, incoming: &Self) {
        debug_assert_eq!(self.merge_key(), incoming.merge_key());

        self.quantity = self.quantity.saturating_add(incoming.quantity);
        if !incoming.name.is_empty() {
            self.name = incoming.name.clone();
        }
        if incoming.variant_label.is_some() {
            self.variant_label = incoming.variant_label.clone();
        }
        if incoming.price.is_some() {
            self.price = incoming.price.clone();
        }
        if incoming.image.is_some() {
            self.image = incoming.image.clone();
        }
        if self.access_url.is_none() {
            self.access_url = incoming.access_url.clone();
        }
        if incoming.shipping_variant_id.is_some() {
            self.shipping_variant_id = incoming.shipping_variant_id.clone();
        }
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(quantity: u32) -> CartEntry {
        CartEntry::new(
            ProductId::new("hoodie"),
            Some(VariantId::new("v1")),
            Quantity::clamped(i64::from(quantity)),
        )
    }

    #[test]
    fn test_merge_sums_and_clamps_quantity() {
        let mut a = entry(60);
        a.merge_from(&entry(60));
        assert_eq!(a.quantity.get(), 99);
    }

    #[test]
    fn test_merge_keeps_free_access() {
        let mut a = entry(1);
        a.access_url = Some("/downloads/zine.pdf".to_string());
        let mut b = entry(1);
        b.price = Some(PriceField::Number(19.5));

        a.merge_from(&b);
        assert!(a.is_free_access());
        assert!(a.price.is_some());
    }

    #[test]
    fn test_unsafe_access_url_is_not_free() {
        let mut e = entry(1);
        e.access_url = Some("javascript:alert(1)".to_string());
        assert!(!e.is_free_access());

        e.access_url = Some("https://cdn.tidepool.shop/zine.pdf".to_string());
        assert!(e.is_free_access());
    }

    #[test]
    fn test_merge_bumps_updated_at() {
        let past = Utc::now() - chrono::Duration::minutes(5);
        let mut a = entry(1);
        a.updated_at = Some(past);

        a.merge_from(&entry(1));
        assert!(a.updated_at.unwrap() > past);
        // added_at marks the original add, not the merge
        assert!(a.added_at.unwrap() > past);
    }

    #[test]
    fn test_merge_carries_shipping_identity() {
        let mut a = entry(1);
        let mut b = entry(1);
        b.shipping_variant_id = Some("ship-77".to_string());

        a.merge_from(&b);
        assert_eq!(a.shipping_variant_id.as_deref(), Some("ship-77"));

        // A merge without one leaves the known identity in place
        a.merge_from(&entry(1));
        assert_eq!(a.shipping_variant_id.as_deref(), Some("ship-77"));
    }

    #[test]
    fn test_deserialize_tolerates_missing_fields() {
        let e: CartEntry = serde_json::from_str(r#"{"productId":"hoodie"}"#).unwrap();
        assert_eq!(e.product_id.as_str(), "hoodie");
        assert_eq!(e.quantity.get(), 1);
        assert_eq!(e.row_id(), "hoodie");
    }

    #[test]
    fn test_empty_variant_id_is_absent() {
        let e = CartEntry::new(
            ProductId::new("hoodie"),
            Some(VariantId::new("  ")),
            Quantity::ONE,
        );
        assert_eq!(e.variant_id, None);
        assert_eq!(e.row_id(), "hoodie");
    }
}
