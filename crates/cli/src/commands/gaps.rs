//! Gap detection command handlers.

use crate::session::{print_json, Session};
use clap::Args;
use meridian_core::{config::AppConfig, AppResult};
use meridian_engine::{detect_emerging_issues, GapDetectionResult};

/// Find tickets whose resolutions the KB does not cover
#[derive(Args, Debug)]
pub struct GapsCommand {
    /// Check a single ticket instead of scanning all of them
    #[arg(long)]
    pub ticket: Option<String>,

    /// Show at most this many results
    #[arg(long)]
    pub limit: Option<usize>,

    /// Include covered tickets in the output
    #[arg(long)]
    pub all: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl GapsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing gaps command");

        let session = Session::open(config).await?;
        let detector = session.detector()?;

        let results = match &self.ticket {
            Some(id) => vec![detector.check_ticket(id).await?],
            None => detector.scan_all_tickets().await?,
        };
        session.close()?;

        let total = results.len();
        let gap_count = results.iter().filter(|r| r.is_gap).count();
        let shown: Vec<&GapDetectionResult> = results
            .iter()
            .filter(|r| self.all || self.ticket.is_some() || r.is_gap)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();

        if self.json {
            return print_json(&shown);
        }

        println!(
            "{} of {} tickets are gaps (threshold {:.2})",
            gap_count,
            total,
            detector.threshold()
        );
        for result in shown {
            let marker = if result.is_gap { "GAP" } else { "ok " };
            println!(
                "  {} {:<12} {:.3} -> {:<12} tier {} {}/{}",
                marker,
                result.ticket_id,
                result.resolution_similarity,
                result.best_matching_kb_id,
                result.tier,
                result.category,
                result.module
            );
        }

        Ok(())
    }
}

/// Cluster gap tickets into emerging issues
#[derive(Args, Debug)]
pub struct EmergingCommand {
    /// Minimum gap tickets per cluster (default: gaps.min_cluster_size)
    #[arg(long)]
    pub min_cluster_size: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl EmergingCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing emerging command");

        let session = Session::open(config).await?;
        let min_size = self
            .min_cluster_size
            .unwrap_or(session.engine.gaps.min_cluster_size);

        let results = session.detector()?.scan_all_tickets().await?;
        session.close()?;

        let issues = detect_emerging_issues(&results, min_size);

        if self.json {
            return print_json(&issues);
        }

        if issues.is_empty() {
            println!("No emerging issues with at least {} gap tickets", min_size);
            return Ok(());
        }

        for issue in &issues {
            println!(
                "{} / {}: {} tickets (avg similarity {:.3})",
                issue.category, issue.module, issue.ticket_count, issue.avg_similarity
            );
            println!("  tickets: {}", issue.ticket_ids.join(", "));
            println!("  sample: {}", issue.sample_resolution);
        }

        Ok(())
    }
}
