//! Classify command handler.
//!
//! Routes a question to its primary partition and shows the score
//! breakdown alongside primary and secondary results.

use crate::commands::query::print_results;
use crate::session::{print_json, Session};
use clap::Args;
use meridian_core::{config::AppConfig, AppResult};

/// Classify a question and retrieve from the predicted partition
#[derive(Args, Debug)]
pub struct ClassifyCommand {
    /// Question text
    pub text: String,

    /// Number of primary results (default: retrieval.top_k)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ClassifyCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing classify command");

        let session = Session::open(config).await?;
        let top_k = self.top_k.unwrap_or(session.engine.retrieval.top_k);

        let routed = session.router().route_and_retrieve(&self.text, top_k).await?;
        session.close()?;

        if self.json {
            return print_json(&routed);
        }

        println!("Predicted: {}", routed.predicted());
        for (partition, score) in &routed.classification.scores {
            println!(
                "  {:<6} keyword={:.3} retrieval={:.3} combined={:.3}",
                partition.as_str(),
                score.keyword,
                score.retrieval,
                score.combined
            );
        }

        println!();
        println!("Primary:");
        print_results(&routed.primary);

        for (partition, results) in &routed.secondary {
            println!();
            println!("Secondary {}:", partition);
            print_results(results);
        }

        Ok(())
    }
}
