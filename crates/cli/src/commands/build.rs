//! Build command handler.

use crate::session::{print_json, Session};
use clap::Args;
use meridian_core::{config::AppConfig, AppResult};
use std::time::Instant;

/// Build (or reuse) the partition indexes for the document corpus
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl BuildCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing build command");

        let start = Instant::now();
        let session = Session::open(config).await?;
        let stats = session.index.stats().await;
        session.close()?;

        if self.json {
            print_json(&stats)?;
        } else {
            println!(
                "Index built in {:.2}s (model: {})",
                start.elapsed().as_secs_f64(),
                stats.model
            );
            for partition in &stats.partitions {
                println!("  {}: {} documents", partition.partition, partition.stored_vectors);
            }
        }

        Ok(())
    }
}
