//! Query command handler.

use crate::session::{print_json, Session};
use clap::Args;
use meridian_core::{config::AppConfig, AppResult};
use meridian_engine::{Partition, RetrievalResult};
use std::collections::HashSet;

/// Retrieve the most similar documents for a question
#[derive(Args, Debug)]
pub struct QueryCommand {
    /// Question text
    pub text: String,

    /// Number of results (default: retrieval.top_k)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Restrict to these partitions (KB, SCRIPT, TICKET); repeatable
    #[arg(short, long = "partition")]
    pub partitions: Vec<Partition>,

    /// Document ids to leave out; repeatable
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl QueryCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing query command");

        let session = Session::open(config).await?;
        let top_k = self.top_k.unwrap_or(session.engine.retrieval.top_k);
        let exclude: HashSet<String> = self.exclude.iter().cloned().collect();

        let results = session
            .index
            .query(&self.text, top_k, &self.partitions, &exclude)
            .await?;
        session.close()?;

        if self.json {
            print_json(&results)?;
        } else if results.is_empty() {
            println!("No matching documents");
        } else {
            print_results(&results);
        }

        Ok(())
    }
}

/// Human-readable result list.
pub(crate) fn print_results(results: &[RetrievalResult]) {
    for result in results {
        println!(
            "{:>2}. [{}] {} ({:.3}) {}",
            result.rank, result.partition, result.doc_id, result.score, result.title
        );
    }
}
