// Main entry point for the relay
//
// stdout carries the tool protocol, so all logging goes to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::{kernel::RelayKernel, server::ToolServer, Config};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Firecrawl relay");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        api_url = %config.api_url,
        deployment = config.deployment_label(),
        retry_attempts = config.retry_attempts,
        "Configuration loaded"
    );
    if config.api_key.is_none() && config.is_cloud {
        tracing::warn!("No API key configured for a cloud deployment; requests will be rejected");
    }

    let kernel = RelayKernel::from_config(&config)?;
    let server = Arc::new(ToolServer::new(kernel.adapter.clone(), &config));

    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("Server error")?;

    Ok(())
}
