//! Discrepancies command implementation

use chrono::Utc;
use clap::Args;
use std::path::PathBuf;

use crate::data::ParquetReader;
use crate::validation::DiscrepancyStats;

#[derive(Args, Debug)]
pub struct DiscrepanciesArgs {
    /// Discrepancy log written by `run` with capture enabled
    pub file: PathBuf,

    /// Number of most recent rows to list
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,
}

impl DiscrepanciesArgs {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let mut records = ParquetReader::new(&self.file).read_discrepancies()?;
        let stats = DiscrepancyStats::from_records(&records, Utc::now());

        println!("Discrepancies in {}", self.file.display());
        println!("  Total:              {}", stats.total);
        println!("  Significant:        {}", stats.significant);
        println!("  Potential arbitrage: {}", stats.potential_arbitrage);
        println!("  Average diff:       {}%", stats.average_discrepancy_pct);
        println!("  Last 24h:           {}", stats.last_24h_significant);

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        for record in records.iter().take(self.limit) {
            println!(
                "  {} {} stream={} rest={} diff={}%{}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.market_id,
                record.stream_yes,
                record.rest_yes,
                record.max_diff_pct,
                if record.potential_arbitrage { " ARB" } else { "" },
            );
        }

        Ok(())
    }
}
