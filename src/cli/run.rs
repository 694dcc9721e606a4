//! Run command implementation

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::pipeline::FeedPipeline;

use super::load_markets;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON file listing the markets to follow
    #[arg(short, long)]
    pub markets: PathBuf,

    /// Seconds between price and health reports
    #[arg(long, default_value_t = 30)]
    pub report_secs: u64,
}

impl RunArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let markets = load_markets(&self.markets)?;
        let validation_period = Duration::from_secs(config.validation.interval_secs.max(1));

        let pipeline = FeedPipeline::new(config)?;
        let tokens = pipeline.subscribe_markets(&markets);
        tracing::info!(markets = markets.len(), tokens, "Loaded market list");

        pipeline.initialize().await?;

        let mut report = tokio::time::interval(Duration::from_secs(self.report_secs.max(1)));
        report.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut validate = tokio::time::interval(validation_period);
        validate.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown requested");
                    break;
                }

                _ = report.tick() => {
                    let prices = pipeline.get_prices_batch(&markets).await;
                    for market in &markets {
                        if let Some(price) = prices.get(&market.market_id) {
                            tracing::info!(
                                market_id = %price.market_id,
                                source = %price.source,
                                yes = ?price.yes_price,
                                no = ?price.no_price,
                                latency_ms = price.latency_ms,
                                "Price"
                            );
                        }
                    }

                    let health = pipeline.get_health_report();
                    tracing::info!(
                        state = %health.connection.state,
                        primary = %health.primary_source,
                        reliability = health.overall_reliability,
                        cache_entries = health.cache_entries,
                        messages = health.connection.messages_received,
                        "Health"
                    );
                }

                _ = validate.tick() => {
                    let significant = pipeline.validate_markets(&markets).await;
                    let stats = pipeline.discrepancy_stats();
                    tracing::info!(
                        significant = significant.len(),
                        total = stats.total,
                        last_24h = stats.last_24h_significant,
                        "Validation pass"
                    );
                }
            }
        }

        pipeline.close().await;
        Ok(())
    }
}
