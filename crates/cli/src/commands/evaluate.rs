//! Evaluate command handler.
//!
//! Always reports gap counts with and without the learned KB articles.
//! With `--questions` it also scores retrieval hit@k and routing accuracy.

use crate::session::{print_json, Session};
use clap::Args;
use meridian_core::{config::AppConfig, AppError, AppResult};
use meridian_engine::evaluation::HitRates;
use meridian_engine::{
    BeforeAfterReport, ClassificationEvaluation, EvalQuestion, RetrievalBeforeAfter,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Measure what the learned KB articles contribute
#[derive(Args, Debug)]
pub struct EvaluateCommand {
    /// JSON file with evaluation questions
    #[arg(short, long)]
    pub questions: Option<PathBuf>,

    /// Cutoffs for hit@k
    #[arg(short, long, value_delimiter = ',', default_values_t = vec![1, 5, 10])]
    pub k: Vec<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct EvaluationOutput {
    gaps: BeforeAfterReport,

    #[serde(skip_serializing_if = "Option::is_none")]
    retrieval: Option<RetrievalBeforeAfter>,

    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<ClassificationEvaluation>,
}

impl EvaluateCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing evaluate command");

        let questions = match &self.questions {
            Some(path) => Some(load_questions(path)?),
            None => None,
        };

        let session = Session::open(config).await?;
        let evaluator = session.evaluator()?;

        let gaps = evaluator.before_after().await?;
        let (retrieval, classification) = match &questions {
            Some(questions) => (
                Some(evaluator.retrieval_before_after(questions, &self.k).await?),
                Some(evaluator.evaluate_classification(questions).await?),
            ),
            None => (None, None),
        };
        session.close()?;

        let output = EvaluationOutput {
            gaps,
            retrieval,
            classification,
        };

        if self.json {
            return print_json(&output);
        }

        print_gaps(&output.gaps);
        if let Some(retrieval) = &output.retrieval {
            println!();
            println!(
                "Retrieval ({} questions):",
                retrieval.after.total_questions
            );
            print_rates("before", &retrieval.before.overall);
            print_rates("after", &retrieval.after.overall);
            print_rates("lift", &retrieval.hit_improvement);
        }
        if let Some(classification) = &output.classification {
            println!();
            println!("Routing accuracy: {:.3}", classification.accuracy);
            for (partition, metrics) in &classification.per_class {
                println!(
                    "  {:<6} precision={:.3} recall={:.3} f1={:.3} support={}",
                    partition.as_str(),
                    metrics.precision,
                    metrics.recall,
                    metrics.f1,
                    metrics.support
                );
            }
        }

        Ok(())
    }
}

fn load_questions(path: &Path) -> AppResult<Vec<EvalQuestion>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("Failed to read questions {:?}: {}", path, e)))?;
    let questions: Vec<EvalQuestion> = serde_json::from_str(&contents)
        .map_err(|e| AppError::Serialization(format!("Invalid questions in {:?}: {}", path, e)))?;

    tracing::info!("Loaded {} evaluation questions", questions.len());
    Ok(questions)
}

fn print_gaps(report: &BeforeAfterReport) {
    println!("Learned articles: {}", report.learned_articles);
    println!(
        "Gaps before: {} of {} (avg similarity {:.3})",
        report.before.total_gaps, report.before.ticket_count, report.before.avg_resolution_similarity
    );
    println!(
        "Gaps after:  {} of {} (avg similarity {:.3})",
        report.after.total_gaps, report.after.ticket_count, report.after.avg_resolution_similarity
    );
    println!(
        "Closed {} gaps ({:.1}%), similarity lift {:+.3}",
        report.improvement.gaps_closed,
        report.improvement.pct_improvement,
        report.improvement.similarity_lift
    );
    if !report.restored_without_embedding {
        println!("warning: restoring learned articles required re-embedding");
    }
}

fn print_rates(label: &str, rates: &HitRates) {
    let line: Vec<String> = rates
        .iter()
        .map(|(key, rate)| format!("{}={:.3}", key, rate))
        .collect();
    println!("  {:<7} {}", label, line.join(" "));
}
