//! Card tokenization seam.
//!
//! Card capture lives with the payment provider's own surface, initialized
//! from [`TokenizerConfig`]; this process never sees card numbers. The
//! engine only asks the surface to exchange whatever it captured for a
//! one-time token, then forwards that token to the commerce backend.
//!
//! [`TokenizerConfig`]: crate::config::TokenizerConfig

use async_trait::async_trait;
use thiserror::Error;

/// Tokenization failures.
///
/// Both variants are recoverable: the checkout stays on the payment step
/// and the shopper corrects the card or retries.
#[derive(Debug, Error)]
pub enum TokenizeError {
    /// The provider rejected the captured card.
    #[error("{0}")]
    Declined(String),
    /// The provider surface is missing or unreachable.
    #[error("payment form unavailable: {0}")]
    Unavailable(String),
}

/// A one-time card token plus display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardToken {
    /// Opaque single-use token, forwarded verbatim to the backend.
    pub token: String,
    /// Card brand for the confirmation view, when the provider shares it.
    pub brand: Option<String>,
    /// Last four digits for the confirmation view.
    pub last4: Option<String>,
}

impl CardToken {
    /// A token with no display metadata.
    #[must_use]
    pub fn bare(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            brand: None,
            last4: None,
        }
    }
}

/// The provider's capture surface as the checkout state machine sees it.
#[async_trait]
pub trait CardTokenizer: Send + Sync {
    /// Ensure the capture surface is mounted. Idempotent; attaching an
    /// already-mounted surface is a no-op.
    async fn attach(&self) -> Result<(), TokenizeError>;

    /// Exchange the currently captured card details for a one-time token.
    async fn tokenize(&self) -> Result<CardToken, TokenizeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declined_message_is_verbatim() {
        let err = TokenizeError::Declined("CVV verification failed".to_string());
        assert_eq!(err.to_string(), "CVV verification failed");
    }

    #[test]
    fn test_bare_token() {
        let token = CardToken::bare("cnon:abc");
        assert_eq!(token.token, "cnon:abc");
        assert_eq!(token.brand, None);
    }
}
