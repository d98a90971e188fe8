//! Catalog feed wire schema.
//!
//! The feed is a periodically published JSON document. It has drifted over
//! the years, so deserialization is deliberately tolerant: the variant list
//! accepts both `variants` and the historical misspelling `varients`, images
//! arrive as bare strings or objects, and prices arrive in three shapes
//! (see [`PriceField`]).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tidepool_core::{DEFAULT_CURRENCY, Money};

/// The feed document: either a bare product array or `{"products": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedDocument {
    List(Vec<FeedProduct>),
    Wrapped {
        #[serde(default)]
        products: Vec<FeedProduct>,
    },
}

impl FeedDocument {
    /// The product list, whichever shape it arrived in.
    #[must_use]
    pub fn into_products(self) -> Vec<FeedProduct> {
        match self {
            Self::List(products) | Self::Wrapped { products } => products,
        }
    }
}

/// One product row in the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedProduct {
    #[serde(default, alias = "productId")]
    pub id: String,
    #[serde(default, alias = "title")]
    pub name: String,
    #[serde(default)]
    pub price: Option<PriceField>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageField>,
    /// `varients` is the spelling most published feeds actually use.
    #[serde(default, alias = "varients")]
    pub variants: Vec<FeedVariant>,
    /// Positional labels for variant option groups (e.g. `["color","size"]`).
    #[serde(default, alias = "variation_types")]
    pub variation_types: Vec<String>,
}

/// One variant row in the feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedVariant {
    #[serde(default, alias = "variantId")]
    pub id: String,
    #[serde(default, alias = "name", alias = "label")]
    pub variant_label: Option<String>,
    #[serde(default)]
    pub option_parts: Vec<String>,
    #[serde(default)]
    pub price: Option<PriceField>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    /// Availability flag; missing means available.
    #[serde(default)]
    pub available: Option<bool>,
    /// Backend-specific shipping variant identifier, when the item ships.
    #[serde(default, alias = "shipping_variant_id")]
    pub shipping_variant_id: Option<String>,
}

/// An image reference: a bare URL string or an object carrying one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageField {
    Url(String),
    Object {
        #[serde(default, alias = "src", alias = "imageUrl")]
        url: Option<String>,
    },
}

impl ImageField {
    /// The URL inside, if any.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url(u) => Some(u),
            Self::Object { url } => url.as_deref(),
        }
    }
}

/// A price as it appears in source data.
///
/// Three shapes are accepted: a plain number, a display string with
/// currency decoration, or a structured amount. All normalize through
/// [`Money`]: integral values >= 1000 are taken as minor units (cents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceField {
    Number(f64),
    Text(String),
    Structured {
        amount: f64,
        #[serde(default)]
        currency: Option<String>,
    },
}

impl PriceField {
    /// Normalize into a currency-tagged decimal, if the source is numeric.
    #[must_use]
    pub fn to_money(&self, fallback_currency: &str) -> Option<Money> {
        match self {
            Self::Number(n) => {
                let raw = Decimal::try_from(*n).ok()?;
                Some(Money::from_raw(raw, fallback_currency))
            }
            Self::Text(s) => Money::parse(s, fallback_currency),
            Self::Structured { amount, currency } => {
                let raw = Decimal::try_from(*amount).ok()?;
                Some(Money::from_raw(
                    raw,
                    currency.as_deref().unwrap_or(fallback_currency),
                ))
            }
        }
    }
}

impl Default for PriceField {
    fn default() -> Self {
        Self::Number(0.0)
    }
}

/// Default currency for a variant, falling back to USD.
#[must_use]
pub fn variant_currency(variant: &FeedVariant) -> &str {
    variant.currency.as_deref().unwrap_or(DEFAULT_CURRENCY)
}
