//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. Catalog and cart IDs
//! are opaque strings supplied by the catalog feed and the account store, so
//! these wrap `String` (trimmed on construction) rather than integers.

use serde::{Deserialize, Serialize};

/// Macro to define a type-safe string ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - Trimming constructor: `new()`
/// - `as_str()` accessor and `Display`
///
/// # Example
///
/// ```rust
/// # use tidepool_core::define_id;
/// define_id!(ProductId);
/// define_id!(AccountId);
///
/// let product = ProductId::new(" tide-hoodie ");
/// assert_eq!(product.as_str(), "tide-hoodie");
///
/// // These are different types, so this won't compile:
/// // let _: ProductId = AccountId::new("x");
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID, trimming surrounding whitespace.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into().trim().to_string())
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the ID is empty after trimming.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self::new(id)
            }
        }
    };
}

// Define standard entity IDs
define_id!(ProductId);
define_id!(VariantId);
define_id!(AccountId);
define_id!(QuoteId);

/// The identity of one logical cart line: `(productId, variantId)`.
///
/// Two cart rows with the same merge key are the same logical item and must
/// be collapsed into one row whose quantity is the clamped sum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeKey {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
}

impl MergeKey {
    /// Create a merge key. A variant ID that trims to empty counts as absent.
    #[must_use]
    pub fn new(product_id: ProductId, variant_id: Option<VariantId>) -> Self {
        let variant_id = variant_id.filter(|v| !v.is_empty());
        Self {
            product_id,
            variant_id,
        }
    }

    /// Deterministic row ID used for persisted cart entries.
    ///
    /// Using the merge key as the row ID is what makes `add_or_merge` upserts
    /// collapse concurrent adds into a single row.
    #[must_use]
    pub fn row_id(&self) -> String {
        match &self.variant_id {
            Some(v) => format!("{}__{}", self.product_id, v),
            None => self.product_id.to_string(),
        }
    }
}

impl std::fmt::Display for MergeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.row_id())
    }
}
