//! SmartFactory gateway binary.

use anyhow::{Context, Result};
use clap::Parser;
use smartfactory_common::init_tracing;
use smartfactory_gateway::{GatewayArgs, GatewayConfig, GatewayRunner};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = GatewayArgs::parse();

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if args.check {
        println!(
            "Configuration OK: gateway '{}', {} controller(s), endpoint {}",
            config.gateway.name,
            config.controllers.len(),
            config.dispatch.endpoint_url
        );
        return Ok(());
    }

    let mut logging = config.logging.clone();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }
    init_tracing(&logging).context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting SmartFactory gateway"
    );

    let runner = GatewayRunner::new(config).context("Failed to start gateway")?;
    runner.run().await.context("Gateway failed")?;

    Ok(())
}
