//! `catalog inspect` / `catalog resolve` - exercise the live feed.

use tidepool_checkout::EngineConfig;
use tidepool_checkout::catalog::CatalogIndex;
use tidepool_core::{ProductId, VariantId};
use tracing::{info, warn};

fn load_index() -> Result<CatalogIndex, Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;
    Ok(CatalogIndex::new(
        reqwest::Client::new(),
        config.catalog_feed_url,
    ))
}

/// Fetch the feed and summarize what indexed.
///
/// # Errors
///
/// Returns `ConfigError` when the environment is not set up; a feed
/// failure is reported as an empty index, matching engine behavior.
pub async fn inspect() -> Result<(), Box<dyn std::error::Error>> {
    let index = load_index()?;
    let snapshot = index.load().await;

    if snapshot.is_empty() {
        warn!("catalog index is empty (feed unreachable or no products)");
        return Ok(());
    }
    info!(products = snapshot.len(), "catalog indexed");
    Ok(())
}

/// Resolve one product the way the cart would.
///
/// # Errors
///
/// Returns `ConfigError` when the environment is not set up.
pub async fn resolve(
    product: &str,
    variant: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let index = load_index()?;
    let snapshot = index.load().await;

    let product_id = ProductId::new(product);
    let variant_id = variant.map(VariantId::new);

    let Some(found) = snapshot.product(&product_id) else {
        warn!(%product_id, "product not in catalog");
        return Ok(());
    };

    let price = snapshot.resolve_price(&product_id, variant_id.as_ref());
    let image = snapshot.resolve_image(&product_id, variant_id.as_ref());
    let shipping = variant_id
        .as_ref()
        .and_then(|vid| snapshot.shipping_identity(&product_id, vid));

    info!(
        name = %found.name,
        variants = found.variants.len(),
        price = %price.map_or_else(|| "-".to_owned(), |p| p.to_string()),
        image = image.as_deref().unwrap_or("-"),
        shipping_identity = shipping.as_deref().unwrap_or("-"),
        "resolved"
    );
    Ok(())
}
