//! `config check` - load and validate the engine configuration.

use tidepool_checkout::EngineConfig;
use tracing::info;

/// Load configuration from the environment, reporting the first problem.
///
/// # Errors
///
/// Returns the underlying `ConfigError` when a variable is missing,
/// malformed, or fails secret validation.
pub fn check() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;
    // Secrets are redacted by the config's Debug impl
    info!(?config, "configuration OK");
    Ok(())
}
