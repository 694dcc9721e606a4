//! Quote command implementation

use clap::Args;

use crate::config::Config;
use crate::pipeline::FeedPipeline;

#[derive(Args, Debug)]
pub struct QuoteArgs {
    /// Market (condition) id
    pub market_id: String,

    /// YES outcome token id
    #[arg(long)]
    pub yes: Option<String>,

    /// NO outcome token id
    #[arg(long)]
    pub no: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl QuoteArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        // A one-shot lookup has nothing to wait for on the push feed
        config.feed.enabled = false;

        let pipeline = FeedPipeline::new(config)?;
        let result = pipeline
            .get_price(&self.market_id, self.yes.as_deref(), self.no.as_deref())
            .await;
        pipeline.close().await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        let show = |price: Option<rust_decimal::Decimal>| {
            price.map_or_else(|| "-".to_string(), |p| p.to_string())
        };

        println!("Market: {}", result.market_id);
        println!("  Source:  {}", result.source);
        println!("  YES:     {}", show(result.yes_price));
        println!("  NO:      {}", show(result.no_price));
        println!("  Spread:  {}", show(result.spread()));
        println!("  Latency: {:.1}ms", result.latency_ms);
        Ok(())
    }
}
