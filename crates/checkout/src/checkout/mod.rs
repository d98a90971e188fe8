//! The checkout state machine.
//!
//! Drives Address -> Quote -> Shipping -> Payment -> Confirmation against
//! the commerce backend and the tokenization provider. One [`CheckoutFlow`]
//! is one checkout attempt over one cart; the rendering layer forwards user
//! actions in and renders the step/totals/notice it reads back.
//!
//! Quote expiry is enforced by a timer armed on quote receipt, plus checks
//! at every transition that spends the quote and on every confirmation
//! poll tick. An expired quote is never reused: the flow settles in
//! [`CheckoutStep::Expired`] and must be reopened.

pub mod address;
pub mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cart::CartStore;
use crate::catalog::CatalogIndex;
use crate::commerce::{ChargeRequest, ChargeStatus, CommerceApi, QuoteItem, QuoteRequest};
use crate::config::EngineConfig;
use crate::error::{CheckoutError, FieldError, Result};
use crate::lineitem::{missing_shipping_identity, resolve_cart, shipping_identifier};
use crate::payment::CardTokenizer;

pub use address::ShippingAddress;
pub use session::{CheckoutStep, PayOutcome, Quote, QuotedShipping, Totals};

/// Timing knobs for one flow.
#[derive(Debug, Clone, Copy)]
pub struct FlowTimings {
    /// Quote lifetime when the backend sends no expiry.
    pub quote_ttl: Duration,
    /// Confirmation poll interval.
    pub confirm_poll: Duration,
    /// Wall-clock ceiling for confirmation polling.
    pub confirm_ceiling: Duration,
}

impl Default for FlowTimings {
    fn default() -> Self {
        Self {
            quote_ttl: Duration::from_secs(600),
            confirm_poll: Duration::from_millis(1200),
            confirm_ceiling: Duration::from_secs(60),
        }
    }
}

impl From<&EngineConfig> for FlowTimings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            quote_ttl: config.quote_ttl,
            confirm_poll: config.confirm_poll,
            confirm_ceiling: config.confirm_ceiling,
        }
    }
}

/// What the rendering layer sees of the flow, published on every change.
///
/// Each delivered value is a full snapshot of step, totals, and notice,
/// never a delta.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutEvent {
    pub step: CheckoutStep,
    pub totals: Option<Totals>,
    pub notice: Option<String>,
}

/// Out-of-band cancellation for a running flow.
///
/// Closing the checkout UI while a confirmation poll is in flight flips the
/// shared flag; the poll notices on its next tick and exits silently
/// without mutating checkout state.
#[derive(Clone)]
pub struct CheckoutHandle {
    active: Arc<AtomicBool>,
}

impl CheckoutHandle {
    /// Signal the flow to stop at its next check.
    pub fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// One checkout attempt.
pub struct CheckoutFlow {
    commerce: Arc<dyn CommerceApi>,
    tokenizer: Arc<dyn CardTokenizer>,
    catalog: CatalogIndex,
    cart: Arc<CartStore>,
    timings: FlowTimings,

    step: CheckoutStep,
    address: ShippingAddress,
    quote: Option<Quote>,
    selected_shipping: Option<String>,
    notice: Option<String>,
    active: Arc<AtomicBool>,
    expired: Arc<AtomicBool>,
    expiry_task: Option<JoinHandle<()>>,
    events: watch::Sender<CheckoutEvent>,
}

impl CheckoutFlow {
    #[must_use]
    pub fn new(
        commerce: Arc<dyn CommerceApi>,
        tokenizer: Arc<dyn CardTokenizer>,
        catalog: CatalogIndex,
        cart: Arc<CartStore>,
        timings: FlowTimings,
    ) -> Self {
        let (events, _) = watch::channel(CheckoutEvent {
            step: CheckoutStep::Idle,
            totals: None,
            notice: None,
        });
        Self {
            commerce,
            tokenizer,
            catalog,
            cart,
            timings,
            step: CheckoutStep::Idle,
            address: ShippingAddress::default(),
            quote: None,
            selected_shipping: None,
            notice: None,
            active: Arc::new(AtomicBool::new(false)),
            expired: Arc::new(AtomicBool::new(false)),
            expiry_task: None,
            events,
        }
    }

    // =========================================================================
    // Read side
    // =========================================================================

    /// The current step. Reports `Expired` once the expiry timer has fired,
    /// even before the next user action lands.
    #[must_use]
    pub fn step(&self) -> CheckoutStep {
        if self.expired.load(Ordering::SeqCst) && !self.step.is_settled() {
            return CheckoutStep::Expired;
        }
        self.step
    }

    /// The held quote, if one is live.
    #[must_use]
    pub fn quote(&self) -> Option<&Quote> {
        self.quote.as_ref()
    }

    #[must_use]
    pub fn selected_shipping_id(&self) -> Option<&str> {
        self.selected_shipping.as_deref()
    }

    /// User-facing notice, e.g. the still-processing message.
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Displayed totals for the current quote and selection.
    #[must_use]
    pub fn totals(&self) -> Option<Totals> {
        let quote = self.quote.as_ref()?;
        let selected = quote.option(self.selected_shipping.as_deref()?)?;
        Some(Totals::compute(quote, selected))
    }

    /// A cancellation handle for the rendering layer's close button.
    #[must_use]
    pub fn handle(&self) -> CheckoutHandle {
        CheckoutHandle {
            active: Arc::clone(&self.active),
        }
    }

    /// Subscribe to flow changes. Every delivered [`CheckoutEvent`] is a
    /// full snapshot of step, totals, and notice.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckoutEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Open checkout: reset to `AddressEntry` with a cleared quote.
    ///
    /// # Errors
    ///
    /// `EmptyCart` when nothing is in the cart; `NothingToCharge` when every
    /// line is a free access item. The flow stays `Idle` in both cases.
    pub async fn open(&mut self) -> Result<()> {
        let snapshot = self.catalog.load().await;
        let resolved = resolve_cart(&snapshot, &self.cart.items());
        if resolved.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        if resolved.paid.is_empty() {
            return Err(CheckoutError::NothingToCharge);
        }

        self.cancel_expiry();
        self.quote = None;
        self.selected_shipping = None;
        self.notice = None;
        self.active.store(true, Ordering::SeqCst);
        self.set_step(CheckoutStep::AddressEntry);
        Ok(())
    }

    /// Close checkout, tearing down the expiry timer and abandoning any
    /// in-flight confirmation poll.
    pub fn close(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel_expiry();
        self.quote = None;
        self.selected_shipping = None;
        self.notice = None;
        self.set_step(CheckoutStep::Idle);
    }

    /// Validate the address and request a shipping quote.
    ///
    /// On success the flow holds a quote with the first shipping option
    /// pre-selected. On any failure (validation, blocked items, backend
    /// error, empty option list) the flow is back at `AddressEntry` with no
    /// partial quote retained.
    ///
    /// # Errors
    ///
    /// `Validation` for field failures (no network call is made),
    /// `MissingShippingIdentity` naming blocked items, `Commerce` for
    /// backend failures, `NoShippingOptions` for an unshippable address.
    pub async fn submit_address(&mut self, address: ShippingAddress) -> Result<()> {
        if self.step != CheckoutStep::AddressEntry {
            return Err(CheckoutError::InvalidStep {
                step: self.step,
                action: "submit address",
            });
        }

        address.validate().map_err(CheckoutError::Validation)?;
        self.address = address;

        let snapshot = self.catalog.load().await;
        let resolved = resolve_cart(&snapshot, &self.cart.items());
        if resolved.paid.is_empty() {
            return Err(CheckoutError::NothingToCharge);
        }

        let blocking = missing_shipping_identity(&snapshot, &resolved.paid);
        if !blocking.is_empty() {
            return Err(CheckoutError::MissingShippingIdentity { titles: blocking });
        }

        let items: Vec<QuoteItem> = resolved
            .paid
            .iter()
            .filter_map(|item| {
                shipping_identifier(&snapshot, item).map(|shipping_identifier| QuoteItem {
                    shipping_identifier,
                    qty: item.quantity.get(),
                })
            })
            .collect();

        self.set_step(CheckoutStep::Quoting);
        let request = QuoteRequest {
            items,
            address: self.address.clone(),
        };
        let response = match self.commerce.create_quote(&request).await {
            Ok(response) => response,
            Err(error) => {
                self.set_step(CheckoutStep::AddressEntry);
                return Err(error.into());
            }
        };
        if response.shipping_options.is_empty() {
            self.set_step(CheckoutStep::AddressEntry);
            return Err(CheckoutError::NoShippingOptions);
        }

        let quote = Quote::from_response(&response, resolved.subtotal, self.timings.quote_ttl);
        info!(quote_id = %quote.quote_id, options = quote.shipping_options.len(), "quote received");
        self.selected_shipping = quote.shipping_options.first().map(|o| o.id.clone());
        self.schedule_expiry(quote.expires_at);
        self.quote = Some(quote);
        self.set_step(CheckoutStep::ShippingSelected);
        Ok(())
    }

    /// Change the selected shipping option; totals recompute locally.
    ///
    /// # Errors
    ///
    /// `InvalidStep` outside `ShippingSelected`/`PaymentReady`; `Validation`
    /// for an option ID the quote does not contain.
    pub fn select_shipping(&mut self, option_id: &str) -> Result<Totals> {
        if !matches!(
            self.step,
            CheckoutStep::ShippingSelected | CheckoutStep::PaymentReady
        ) {
            return Err(CheckoutError::InvalidStep {
                step: self.step,
                action: "select shipping",
            });
        }
        if self.quote_is_expired() {
            self.expire();
            return Err(CheckoutError::QuoteExpired);
        }
        let quote = self.quote.as_ref().ok_or(CheckoutError::QuoteExpired)?;
        let Some(selected) = quote.option(option_id) else {
            return Err(CheckoutError::Validation(vec![FieldError {
                field: "shipping",
                message: format!("unknown shipping option '{option_id}'"),
            }]));
        };
        let totals = Totals::compute(quote, selected);
        self.selected_shipping = Some(option_id.to_string());
        self.publish();
        Ok(totals)
    }

    /// Move to `PaymentReady`, mounting the card capture surface.
    ///
    /// # Errors
    ///
    /// `QuoteExpired` when the quote lapsed (the flow settles `Expired`);
    /// `Tokenization` when the surface fails to mount (the flow stays at
    /// `ShippingSelected`).
    pub async fn proceed_to_payment(&mut self) -> Result<()> {
        if self.step != CheckoutStep::ShippingSelected {
            return Err(CheckoutError::InvalidStep {
                step: self.step,
                action: "proceed to payment",
            });
        }
        if self.quote_is_expired() {
            self.expire();
            return Err(CheckoutError::QuoteExpired);
        }

        // Idempotent on the provider side; re-entering payment is a no-op
        self.tokenizer.attach().await?;
        self.set_step(CheckoutStep::PaymentReady);
        Ok(())
    }

    /// The pay action: tokenize, charge, and confirm.
    ///
    /// Accepted from `PaymentReady` and from `Failed` (retry against the
    /// same quote). Expiry is checked before tokenization and again between
    /// tokenization and charge, so a charge is never submitted against a
    /// lapsed quote.
    ///
    /// # Errors
    ///
    /// `Tokenization` reverts to `PaymentReady` for an inline retry;
    /// `Commerce` from the charge call also reverts to `PaymentReady`.
    /// Outcomes that are normal ends of the flow (paid, failed, expired,
    /// still-processing) come back as `Ok(PayOutcome)`.
    pub async fn pay(&mut self) -> Result<PayOutcome> {
        if !self.step.accepts_pay() {
            return Err(CheckoutError::InvalidStep {
                step: self.step,
                action: "pay",
            });
        }
        let (quote, shipping_id) = match (self.quote.clone(), self.selected_shipping.clone()) {
            (Some(quote), Some(shipping_id)) => (quote, shipping_id),
            _ => return Err(CheckoutError::QuoteExpired),
        };
        self.notice = None;

        if self.quote_is_expired() {
            self.expire();
            return Ok(PayOutcome::Expired);
        }

        self.set_step(CheckoutStep::Tokenizing);
        let token = match self.tokenizer.tokenize().await {
            Ok(token) => token,
            Err(error) => {
                self.set_step(CheckoutStep::PaymentReady);
                return Err(error.into());
            }
        };

        // Tokenization took real time; the quote may have lapsed under it
        if quote.is_expired_at(Utc::now()) {
            self.expire();
            return Ok(PayOutcome::Expired);
        }

        self.set_step(CheckoutStep::Charging);
        let request = ChargeRequest {
            quote_id: quote.quote_id.clone(),
            selected_shipping_id: shipping_id,
            source_token: token.token,
        };
        let response = match self.commerce.charge(&request).await {
            Ok(response) => response,
            Err(error) => {
                self.set_step(CheckoutStep::PaymentReady);
                return Err(error.into());
            }
        };

        match response.charge_status() {
            ChargeStatus::Paid => {
                self.finish_paid().await;
                Ok(PayOutcome::Paid)
            }
            ChargeStatus::Failed => {
                self.set_step(CheckoutStep::Failed);
                Ok(PayOutcome::Failed {
                    message: response.message,
                })
            }
            ChargeStatus::Pending => {
                self.set_step(CheckoutStep::Confirming);
                self.confirm(&quote).await
            }
        }
    }

    /// Poll charge status until a terminal answer, expiry, cancellation, or
    /// the wall-clock ceiling. The first query goes out immediately; the
    /// interval wait sits between polls, not before them.
    async fn confirm(&mut self, quote: &Quote) -> Result<PayOutcome> {
        let started = Instant::now();
        loop {
            if quote.is_expired_at(Utc::now()) || self.expired.load(Ordering::SeqCst) {
                self.expire();
                return Ok(PayOutcome::Expired);
            }
            if !self.active.load(Ordering::SeqCst) {
                debug!(quote_id = %quote.quote_id, "confirmation abandoned by close");
                return Ok(PayOutcome::Abandoned);
            }
            if started.elapsed() >= self.timings.confirm_ceiling {
                // The charge may have landed server-side; say so instead of
                // reporting a failure that might not be one
                self.notice = Some(
                    "Payment is still processing. It is safe to check again in a moment."
                        .to_string(),
                );
                self.publish();
                return Ok(PayOutcome::StillProcessing);
            }

            match self.commerce.payment_status(&quote.quote_id).await {
                Err(error) => {
                    warn!(%error, quote_id = %quote.quote_id, "status poll failed, retrying");
                }
                Ok(response) => match response.charge_status() {
                    ChargeStatus::Paid => {
                        self.finish_paid().await;
                        return Ok(PayOutcome::Paid);
                    }
                    ChargeStatus::Failed => {
                        self.set_step(CheckoutStep::Failed);
                        return Ok(PayOutcome::Failed {
                            message: response.message,
                        });
                    }
                    ChargeStatus::Pending => {}
                },
            }

            tokio::time::sleep(self.timings.confirm_poll).await;
        }
    }

    fn quote_is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
            || self
                .quote
                .as_ref()
                .is_none_or(|q| q.is_expired_at(Utc::now()))
    }

    fn expire(&mut self) {
        info!("quote expired, closing checkout");
        self.cancel_expiry();
        self.quote = None;
        self.selected_shipping = None;
        self.active.store(false, Ordering::SeqCst);
        self.set_step(CheckoutStep::Expired);
    }

    /// Settle paid: cart clearing is best-effort and runs exactly once per
    /// settlement; a clearing failure never reverts the paid status.
    async fn finish_paid(&mut self) {
        self.cancel_expiry();
        self.notice = None;
        self.set_step(CheckoutStep::Paid);
        if let Err(error) = self.cart.clear().await {
            warn!(%error, "cart clear after payment failed");
        }
        self.active.store(false, Ordering::SeqCst);
    }

    /// Arm a timer that forces the `Expired` closure when the quote lapses
    /// with the shopper idle. Subscribers see the event without any user
    /// action; flow methods observe it through the shared flag.
    fn schedule_expiry(&mut self, expires_at: DateTime<Utc>) {
        self.cancel_expiry();
        let wait = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let active = Arc::clone(&self.active);
        let expired = Arc::clone(&self.expired);
        let events = self.events.clone();
        self.expiry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if !active.load(Ordering::SeqCst) {
                return;
            }
            info!("quote expired while idle, closing checkout");
            expired.store(true, Ordering::SeqCst);
            active.store(false, Ordering::SeqCst);
            events.send_replace(CheckoutEvent {
                step: CheckoutStep::Expired,
                totals: None,
                notice: None,
            });
        }));
    }

    fn cancel_expiry(&mut self) {
        if let Some(task) = self.expiry_task.take() {
            task.abort();
        }
        self.expired.store(false, Ordering::SeqCst);
    }

    fn set_step(&mut self, step: CheckoutStep) {
        self.step = step;
        self.publish();
    }

    fn publish(&self) {
        self.events.send_replace(CheckoutEvent {
            step: self.step,
            totals: self.totals(),
            notice: self.notice.clone(),
        });
    }
}

impl Drop for CheckoutFlow {
    fn drop(&mut self) {
        if let Some(task) = self.expiry_task.take() {
            task.abort();
        }
    }
}
