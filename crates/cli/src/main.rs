//! Tidepool CLI - catalog inspection and configuration checks.
//!
//! # Usage
//!
//! ```bash
//! # Verify the environment configuration loads and validates
//! tidepool-cli config check
//!
//! # Fetch the catalog feed and summarize what indexed
//! tidepool-cli catalog inspect
//!
//! # Resolve one product the way the cart would
//! tidepool-cli catalog resolve -p tide-hoodie -v v-navy-m
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tidepool-cli")]
#[command(author, version, about = "Tidepool CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the live catalog feed
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Check engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Fetch the feed and summarize the resulting index
    Inspect,
    /// Resolve price, image, and shipping identity for one product
    Resolve {
        /// Product ID
        #[arg(short, long)]
        product: String,

        /// Variant ID
        #[arg(short, long)]
        variant: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load configuration from the environment and report problems
    Check,
}

#[tokio::main]
async fn main() {
    tidepool_checkout::telemetry::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Catalog { action } => match action {
            CatalogAction::Inspect => commands::catalog::inspect().await?,
            CatalogAction::Resolve { product, variant } => {
                commands::catalog::resolve(&product, variant.as_deref()).await?;
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Check => commands::config::check()?,
        },
    }
    Ok(())
}
