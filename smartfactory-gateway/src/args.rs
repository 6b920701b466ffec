//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "smartfactory-gateway")]
#[command(about = "Collects controller readings and forwards them to the SmartFactory endpoint")]
#[command(version)]
pub struct GatewayArgs {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "smartfactory.json5")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    pub check: bool,
}
