//! Unified error handling for the checkout engine.
//!
//! Errors local to one step are absorbed at that step; only unrecoverable
//! ones (quote expiry, repeated network failure) close the whole checkout
//! session. Nothing affecting money or inventory is swallowed without a
//! user-visible signal.

use thiserror::Error;

use crate::cart::CartError;
use crate::checkout::CheckoutStep;
use crate::commerce::CommerceError;
use crate::payment::TokenizeError;

/// A field-level address validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Field identifier, e.g. `"zip"`.
    pub field: &'static str,
    /// Human-readable message for inline display.
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Engine-level error type for checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Bad address/field input - recovered locally, never reaches network.
    #[error("validation failed: {}", format_field_errors(.0))]
    Validation(Vec<FieldError>),

    /// Checkout attempted on an empty cart.
    #[error("cart is empty")]
    EmptyCart,

    /// Every item in the cart is a free access-link item.
    #[error("no paid items; free items are available via their links")]
    NothingToCharge,

    /// Paid items cannot be shipped because their catalog or shipping
    /// identity is unresolvable; lists the blocking item titles.
    #[error("items blocking checkout: {}", .titles.join(", "))]
    MissingShippingIdentity { titles: Vec<String> },

    /// Quote/charge/status call failed - retryable, the state machine
    /// reverts to the last stable step.
    #[error("commerce backend error: {0}")]
    Commerce(#[from] CommerceError),

    /// The backend quoted successfully but offered no way to ship.
    #[error("no shipping options available for this address")]
    NoShippingOptions,

    /// Payment provider rejected the card - surfaced inline, user retries.
    #[error("card tokenization failed: {0}")]
    Tokenization(#[from] TokenizeError),

    /// Quote lapsed. Always forces a full restart of the checkout flow;
    /// shipping and tax figures are not safe to reuse.
    #[error("quote expired, checkout must be restarted")]
    QuoteExpired,

    /// Cart read/write failure - degrades to an empty-but-not-broken view.
    #[error("cart persistence error: {0}")]
    Cart(#[from] CartError),

    /// An action arrived in a step that does not accept it.
    #[error("'{action}' is not valid in step {step:?}")]
    InvalidStep {
        step: CheckoutStep,
        action: &'static str,
    },
}

fn format_field_errors(errors: &[FieldError]) -> String {
    if errors.is_empty() {
        return "(no details)".to_string();
    }
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for `CheckoutError`.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = CheckoutError::Validation(vec![
            FieldError {
                field: "zip",
                message: "ZIP must be 5 digits (or 5+4)".to_string(),
            },
            FieldError {
                field: "email",
                message: "email looks invalid".to_string(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: zip: ZIP must be 5 digits (or 5+4); email: email looks invalid"
        );
    }

    #[test]
    fn test_blocked_titles_display() {
        let err = CheckoutError::MissingShippingIdentity {
            titles: vec!["Tide Hoodie".to_string(), "Reef Mug".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "items blocking checkout: Tide Hoodie, Reef Mug"
        );
    }

    #[test]
    fn test_empty_validation_display() {
        let err = CheckoutError::Validation(vec![]);
        assert_eq!(err.to_string(), "validation failed: (no details)");
    }
}
