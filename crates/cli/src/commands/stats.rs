//! Stats command handler.
//!
//! Shows index state after a build: vectors and live documents per
//! partition, exclusions and the query cache size.

use crate::session::{print_json, Session};
use clap::Args;
use meridian_core::{config::AppConfig, AppResult};

/// Show index statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let session = Session::open(config).await?;
        let stats = session.index.stats().await;

        if self.json {
            print_json(&stats)?;
        } else {
            println!("Model: {} ({} dimensions)", stats.model, stats.dimensions);
            for partition in &stats.partitions {
                println!(
                    "  {}: {} stored, {} live",
                    partition.partition, partition.stored_vectors, partition.live_documents
                );
            }
            println!("  Excluded: {}", stats.excluded);
            println!("  Cached queries: {}", stats.cached_queries);
        }

        Ok(())
    }
}
