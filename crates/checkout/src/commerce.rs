//! Commerce backend client.
//!
//! Three calls: `POST /quote`, `POST /pay`, `GET /payment-status`. The
//! [`CommerceApi`] trait is the seam the checkout state machine drives;
//! [`HttpCommerceApi`] is the production implementation.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tidepool_core::{DEFAULT_CURRENCY, Money, QuoteId};
use tracing::instrument;

use crate::catalog::feed::PriceField;
use crate::checkout::address::ShippingAddress;
use crate::config::EngineConfig;

/// Errors from the commerce backend.
#[derive(Debug, Error)]
pub enum CommerceError {
    /// The request never completed (DNS, TLS, timeout).
    #[error("request failed: {0}")]
    Transport(String),
    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    /// The backend answered 2xx with a body we cannot decode.
    #[error("response decode failed: {0}")]
    Decode(String),
}

// =============================================================================
// Wire types
// =============================================================================

/// One billable line in a quote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteItem {
    /// The backend's shipping variant identifier, resolved from the catalog.
    pub shipping_identifier: String,
    pub qty: u32,
}

/// `POST /quote` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub items: Vec<QuoteItem>,
    pub address: ShippingAddress,
}

/// A shipping option inside a quote.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingOption {
    pub id: String,
    #[serde(default, alias = "name")]
    pub label: String,
    #[serde(default)]
    pub price: Option<PriceField>,
    /// Explicit minor-unit cost, preferred over `price` when present.
    #[serde(default)]
    pub cost_cents: Option<i64>,
    /// Option-level tax, when the backend itemizes it per option.
    #[serde(default)]
    pub tax_cents: Option<i64>,
    /// Backend-computed grand total for this option, trusted when present.
    #[serde(default)]
    pub total_cents: Option<i64>,
    #[serde(default)]
    pub eta_days: Option<u32>,
}

impl ShippingOption {
    /// The option's price as money; missing price means free shipping.
    #[must_use]
    pub fn price_money(&self) -> Money {
        if let Some(cents) = self.cost_cents {
            return Money::from_cents(cents);
        }
        self.price
            .as_ref()
            .and_then(|p| p.to_money(DEFAULT_CURRENCY))
            .unwrap_or_else(|| Money::from_cents(0))
    }

    #[must_use]
    pub fn tax_money(&self) -> Option<Money> {
        self.tax_cents.map(Money::from_cents)
    }

    #[must_use]
    pub fn total_money(&self) -> Option<Money> {
        self.total_cents.map(Money::from_cents)
    }
}

/// A quote expiry timestamp: RFC 3339 or epoch milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExpiryField {
    Rfc3339(DateTime<Utc>),
    EpochMillis(i64),
}

impl ExpiryField {
    /// The expiry as a UTC timestamp, `None` for an unrepresentable epoch.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Rfc3339(dt) => Some(*dt),
            Self::EpochMillis(ms) => Utc.timestamp_millis_opt(*ms).single(),
        }
    }
}

/// `POST /quote` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub quote_id: QuoteId,
    #[serde(default)]
    pub shipping_options: Vec<ShippingOption>,
    #[serde(default)]
    pub tax: Option<PriceField>,
    #[serde(default)]
    pub subtotal: Option<PriceField>,
    /// Absent expiry means the engine applies its configured fallback TTL.
    #[serde(default)]
    pub expires_at: Option<ExpiryField>,
}

/// `POST /pay` body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub quote_id: QuoteId,
    pub selected_shipping_id: String,
    /// One-time card token from the tokenization provider.
    pub source_token: String,
}

/// Terminal interpretation of a backend payment status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Paid,
    Failed,
    /// Anything not recognizably terminal; the poller keeps waiting.
    Pending,
}

impl ChargeStatus {
    /// Map a backend status string. Unknown strings are `Pending`, so a new
    /// backend status never flips an order to paid or failed by accident.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" | "completed" => Self::Paid,
            "failed" | "canceled" | "cancelled" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// True for `Paid` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }
}

/// `POST /pay` and `GET /payment-status` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Backend-supplied failure detail, shown to the shopper on failure.
    #[serde(default)]
    pub message: Option<String>,
}

impl ChargeResponse {
    #[must_use]
    pub fn charge_status(&self) -> ChargeStatus {
        ChargeStatus::from_wire(&self.status)
    }
}

// =============================================================================
// API seam
// =============================================================================

/// The commerce backend as the checkout state machine sees it.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    /// Price a set of items for an address: shipping options, tax, expiry.
    async fn create_quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, CommerceError>;

    /// Charge a quoted order with a card token.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, CommerceError>;

    /// Current payment status for a quote; polled after a pending charge.
    async fn payment_status(&self, quote_id: &QuoteId) -> Result<ChargeResponse, CommerceError>;
}

/// Production [`CommerceApi`] over HTTP with bearer auth.
pub struct HttpCommerceApi {
    http: reqwest::Client,
    base: String,
    api_key: SecretString,
}

impl HttpCommerceApi {
    #[must_use]
    pub fn new(http: reqwest::Client, base: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            http,
            base: base.into(),
            api_key,
        }
    }

    #[must_use]
    pub fn from_config(http: reqwest::Client, config: &EngineConfig) -> Self {
        Self::new(
            http,
            config.commerce_api_base.clone(),
            config.commerce_api_key.clone(),
        )
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CommerceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CommerceError::Api {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }
        response
            .json()
            .await
            .map_err(|e| CommerceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CommerceApi for HttpCommerceApi {
    #[instrument(skip_all, fields(items = request.items.len()))]
    async fn create_quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, CommerceError> {
        let response = self
            .http
            .post(format!("{}/quote", self.base))
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| CommerceError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    #[instrument(skip_all, fields(quote_id = %request.quote_id))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, CommerceError> {
        let response = self
            .http
            .post(format!("{}/pay", self.base))
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| CommerceError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    #[instrument(skip_all, fields(quote_id = %quote_id))]
    async fn payment_status(&self, quote_id: &QuoteId) -> Result<ChargeResponse, CommerceError> {
        let response = self
            .http
            .get(format!("{}/payment-status", self.base))
            .query(&[("quoteId", quote_id.as_str())])
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| CommerceError::Transport(e.to_string()))?;
        Self::decode(response).await
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_status_mapping() {
        assert_eq!(ChargeStatus::from_wire("paid"), ChargeStatus::Paid);
        assert_eq!(ChargeStatus::from_wire("Completed"), ChargeStatus::Paid);
        assert_eq!(ChargeStatus::from_wire("failed"), ChargeStatus::Failed);
        assert_eq!(ChargeStatus::from_wire("canceled"), ChargeStatus::Failed);
        assert_eq!(ChargeStatus::from_wire("cancelled"), ChargeStatus::Failed);
        // Unknown strings never settle the order
        assert_eq!(ChargeStatus::from_wire("processing"), ChargeStatus::Pending);
        assert_eq!(ChargeStatus::from_wire(""), ChargeStatus::Pending);
        assert!(!ChargeStatus::Pending.is_terminal());
    }

    #[test]
    fn test_quote_item_wire_names() {
        let item = QuoteItem {
            shipping_identifier: "ship-77".to_string(),
            qty: 2,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["shippingIdentifier"], "ship-77");
        assert_eq!(json["qty"], 2);
    }

    #[test]
    fn test_expiry_field_shapes() {
        let e: ExpiryField = serde_json::from_str(r#""2026-08-27T12:00:00Z""#).unwrap();
        assert!(e.to_datetime().is_some());

        let e: ExpiryField = serde_json::from_str("1788100000000").unwrap();
        assert!(e.to_datetime().is_some());
    }

    #[test]
    fn test_quote_response_tolerates_missing_fields() {
        let q: QuoteResponse = serde_json::from_str(r#"{"quoteId":"q-1"}"#).unwrap();
        assert_eq!(q.quote_id.as_str(), "q-1");
        assert!(q.shipping_options.is_empty());
        assert!(q.expires_at.is_none());
    }

    #[test]
    fn test_shipping_option_missing_price_is_free() {
        let opt: ShippingOption =
            serde_json::from_str(r#"{"id":"pickup","label":"Pickup"}"#).unwrap();
        assert_eq!(opt.price_money().to_cents(), 0);
        assert!(opt.tax_money().is_none());
        assert!(opt.total_money().is_none());
    }

    #[test]
    fn test_shipping_option_minor_unit_fields() {
        let opt: ShippingOption = serde_json::from_str(
            r#"{"id":"std","name":"Standard","costCents":500,"taxCents":165,"totalCents":2665}"#,
        )
        .unwrap();
        assert_eq!(opt.label, "Standard");
        assert_eq!(opt.price_money().to_cents(), 500);
        assert_eq!(opt.tax_money().unwrap().to_cents(), 165);
        assert_eq!(opt.total_money().unwrap().to_cents(), 2665);
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "héllo wörld";
        let t = truncate(s, 2);
        assert!(t.starts_with('h'));
    }
}
