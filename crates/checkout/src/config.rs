//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CATALOG_FEED_URL` - URL of the published catalog feed document
//! - `COMMERCE_API_BASE` - Base URL of the commerce backend (quote/pay)
//! - `COMMERCE_API_KEY` - Bearer token for the commerce backend
//! - `TOKENIZER_APP_ID` - Card tokenization provider application ID
//! - `TOKENIZER_LOCATION_ID` - Card tokenization provider location ID
//!
//! ## Optional
//! - `QUOTE_TTL_SECS` - Fallback quote lifetime when the backend sends no
//!   expiry (default: 600)
//! - `CONFIRM_POLL_MS` - Charge confirmation poll interval (default: 1200)
//! - `CONFIRM_CEILING_SECS` - Wall-clock ceiling for confirmation polling
//!   (default: 60)

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Checkout engine configuration.
#[derive(Clone)]
pub struct EngineConfig {
    /// URL of the catalog feed document.
    pub catalog_feed_url: String,
    /// Base URL of the commerce backend.
    pub commerce_api_base: String,
    /// Bearer token for the commerce backend.
    pub commerce_api_key: SecretString,
    /// Card tokenization provider configuration.
    pub tokenizer: TokenizerConfig,
    /// Fallback quote lifetime when the backend sends no expiry.
    pub quote_ttl: Duration,
    /// Charge confirmation poll interval.
    pub confirm_poll: Duration,
    /// Wall-clock ceiling for confirmation polling.
    pub confirm_ceiling: Duration,
}

/// Card tokenization provider configuration.
///
/// Both IDs are public values embedded in the capture surface; the provider
/// never hands this process raw card data.
#[derive(Debug, Clone)]
pub struct TokenizerConfig {
    /// Provider application ID.
    pub app_id: String,
    /// Provider location ID.
    pub location_id: String,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("catalog_feed_url", &self.catalog_feed_url)
            .field("commerce_api_base", &self.commerce_api_base)
            .field("commerce_api_key", &"[REDACTED]")
            .field("tokenizer", &self.tokenizer)
            .field("quote_ttl", &self.quote_ttl)
            .field("confirm_poll", &self.confirm_poll)
            .field("confirm_ceiling", &self.confirm_ceiling)
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let catalog_feed_url = get_url("CATALOG_FEED_URL")?;
        let commerce_api_base = get_url("COMMERCE_API_BASE")?;
        let commerce_api_key = get_validated_secret("COMMERCE_API_KEY")?;

        let tokenizer = TokenizerConfig {
            app_id: get_required_env("TOKENIZER_APP_ID")?,
            location_id: get_required_env("TOKENIZER_LOCATION_ID")?,
        };

        let quote_ttl = Duration::from_secs(get_parsed_or_default("QUOTE_TTL_SECS", 600)?);
        let confirm_poll = Duration::from_millis(get_parsed_or_default("CONFIRM_POLL_MS", 1200)?);
        let confirm_ceiling =
            Duration::from_secs(get_parsed_or_default("CONFIRM_CEILING_SECS", 60)?);

        Ok(Self {
            catalog_feed_url,
            commerce_api_base,
            commerce_api_key,
            tokenizer,
            quote_ttl,
            confirm_poll,
            confirm_ceiling,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable that must parse as an absolute URL.
fn get_url(key: &str) -> Result<String, ConfigError> {
    let value = get_required_env(key)?;
    url::Url::parse(&value)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    // Stored as a string; trailing slashes are the caller's concern
    Ok(value.trim_end_matches('/').to_string())
}

/// Get an optional environment variable parsed as `u64`, with a default.
fn get_parsed_or_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
