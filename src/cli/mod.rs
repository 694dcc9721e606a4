//! CLI interface for poly-feed
//!
//! Provides subcommands for:
//! - `run`: Stream prices for a market list with periodic validation
//! - `quote`: One-shot price through the failover chain
//! - `discrepancies`: Summarize a recorded discrepancy log
//! - `config`: Show the effective configuration

mod discrepancies;
mod quote;
mod run;

pub use discrepancies::DiscrepanciesArgs;
pub use quote::QuoteArgs;
pub use run::RunArgs;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::Path;

use crate::market::MarketTokens;

#[derive(Parser, Debug)]
#[command(name = "poly-feed")]
#[command(about = "Multi-source real-time price feed for Polymarket binary markets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream prices for a list of markets
    Run(RunArgs),
    /// Fetch a single market price
    Quote(QuoteArgs),
    /// Summarize a discrepancy log file
    Discrepancies(DiscrepanciesArgs),
    /// Show effective configuration
    Config,
}

/// Read a JSON array of `{market_id, yes_token, no_token}` objects
pub fn load_markets(path: &Path) -> anyhow::Result<Vec<MarketTokens>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read market list {}", path.display()))?;
    let markets: Vec<MarketTokens> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid market list {}", path.display()))?;
    Ok(markets)
}
