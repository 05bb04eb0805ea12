//! # Tableau Server
//!
//! Realtime collaborative drawing server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tableau
//!
//! # Config is read from ./tableau.toml, /etc/tableau/tableau.toml
//! # or ~/.config/tableau/tableau.toml
//! tableau
//!
//! # Run with environment variables
//! TABLEAU_PORT=8080 TABLEAU_HOST=0.0.0.0 tableau
//!
//! # Override any setting
//! TABLEAU__LIMITS__MAX_TABLES=500 tableau
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tableau=debug,tableau_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Tableau server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
