//! Checkout session state: steps, the held quote, and computed totals.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tidepool_core::{DEFAULT_CURRENCY, Money, QuoteId};

use crate::commerce::QuoteResponse;

/// Where one checkout attempt currently stands.
///
/// `Idle` is the closed state; opening checkout resets to `AddressEntry`
/// with a cleared quote. `Failed` is re-entrant (the pay action is offered
/// again against the same quote); `Paid` and `Expired` are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStep {
    Idle,
    AddressEntry,
    Quoting,
    ShippingSelected,
    PaymentReady,
    Tokenizing,
    Charging,
    Confirming,
    Paid,
    Failed,
    Expired,
}

impl CheckoutStep {
    /// True for steps from which the pay action is accepted.
    #[must_use]
    pub fn accepts_pay(self) -> bool {
        matches!(self, Self::PaymentReady | Self::Failed)
    }

    /// True once this attempt can never charge again.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Paid | Self::Expired)
    }
}

/// One shipping choice inside a held quote.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotedShipping {
    pub id: String,
    pub label: String,
    pub price: Money,
    /// Itemized per-option tax, when the backend breaks it out.
    pub tax: Option<Money>,
    /// Backend-computed grand total for this option, trusted when present.
    pub total: Option<Money>,
    pub eta_days: Option<u32>,
}

/// A time-boxed backend pricing offer, held for one checkout attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub quote_id: QuoteId,
    pub shipping_options: Vec<QuotedShipping>,
    pub subtotal: Money,
    pub tax: Option<Money>,
    /// Past this instant nothing in the quote is trusted.
    pub expires_at: DateTime<Utc>,
}

impl Quote {
    /// Build from a backend response.
    ///
    /// A response without a subtotal keeps the locally computed one; a
    /// response without an expiry gets `fallback_ttl` from now.
    #[must_use]
    pub fn from_response(
        response: &QuoteResponse,
        local_subtotal: Money,
        fallback_ttl: Duration,
    ) -> Self {
        let subtotal = response
            .subtotal
            .as_ref()
            .and_then(|p| p.to_money(DEFAULT_CURRENCY))
            .unwrap_or(local_subtotal);

        let expires_at = response
            .expires_at
            .as_ref()
            .and_then(crate::commerce::ExpiryField::to_datetime)
            .unwrap_or_else(|| {
                Utc::now()
                    + chrono::Duration::from_std(fallback_ttl)
                        .unwrap_or_else(|_| chrono::Duration::minutes(10))
            });

        Self {
            quote_id: response.quote_id.clone(),
            shipping_options: response
                .shipping_options
                .iter()
                .map(|o| QuotedShipping {
                    id: o.id.clone(),
                    label: o.label.clone(),
                    price: o.price_money(),
                    tax: o.tax_money(),
                    total: o.total_money(),
                    eta_days: o.eta_days,
                })
                .collect(),
            subtotal,
            tax: response
                .tax
                .as_ref()
                .and_then(|p| p.to_money(DEFAULT_CURRENCY)),
            expires_at,
        }
    }

    /// True once `now` has passed the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Find a shipping option by ID.
    #[must_use]
    pub fn option(&self, id: &str) -> Option<&QuotedShipping> {
        self.shipping_options.iter().find(|o| o.id == id)
    }
}

/// Displayed totals for the current quote and shipping selection.
///
/// Recomputed locally whenever the selection changes; never a network call.
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    pub subtotal: Money,
    pub shipping: Money,
    pub tax: Option<Money>,
    pub total: Money,
}

impl Totals {
    /// Combine a quote with one of its shipping options.
    ///
    /// An option-level tax overrides the quote-level one, and an
    /// option-level total is trusted outright; otherwise the total is
    /// `subtotal + shipping + tax`.
    #[must_use]
    pub fn compute(quote: &Quote, selected: &QuotedShipping) -> Self {
        let tax = selected.tax.clone().or_else(|| quote.tax.clone());
        let tax_amount = tax.as_ref().map_or(Decimal::ZERO, |t| t.amount);
        let total = selected.total.clone().unwrap_or_else(|| {
            Money::new(
                quote.subtotal.amount + selected.price.amount + tax_amount,
                quote.subtotal.currency.clone(),
            )
        });
        Self {
            subtotal: quote.subtotal.clone(),
            shipping: selected.price.clone(),
            tax,
            total,
        }
    }
}

/// How one pay action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayOutcome {
    /// Charge confirmed; the cart has been cleared.
    Paid,
    /// Charge failed or was canceled; the quote is still usable for retry.
    Failed { message: Option<String> },
    /// The confirmation ceiling elapsed with the charge still pending.
    /// Payment may have succeeded server-side; safe to retry checking.
    StillProcessing,
    /// The quote lapsed; checkout must be restarted.
    Expired,
    /// Checkout was closed while confirmation was in flight.
    Abandoned,
}
