//! Self-learning evaluation.
//!
//! The before/after protocol measures what the learned KB articles add:
//!
//! 1. Collect the learned articles while they are still live
//! 2. Measure with them present ("after")
//! 3. Exclude them and measure again ("before")
//! 4. Restore them through `add`, which must not embed anything
//!
//! Step 4 also runs when step 3 fails: [`ExclusionGuard`] puts the ids back
//! on drop, so the index always ends in the state it started in.

use crate::gaps::GapDetector;
use crate::index::{AddOutcome, PartitionedIndex};
use crate::router::QueryRouter;
use crate::types::{Document, GapDetectionResult, Partition};
use chrono::{DateTime, Utc};
use meridian_core::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Gap-scan summary for one side of the comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapSnapshot {
    pub total_gaps: usize,
    pub avg_resolution_similarity: f32,
    pub gaps_by_tier: BTreeMap<u8, usize>,
    pub ticket_count: usize,
}

impl GapSnapshot {
    pub fn from_results(results: &[GapDetectionResult]) -> Self {
        let mut gaps_by_tier = BTreeMap::new();
        let mut total_gaps = 0;
        for result in results.iter().filter(|r| r.is_gap) {
            total_gaps += 1;
            *gaps_by_tier.entry(result.tier).or_insert(0) += 1;
        }

        let avg_resolution_similarity = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.resolution_similarity).sum::<f32>() / results.len() as f32
        };

        Self {
            total_gaps,
            avg_resolution_similarity,
            gaps_by_tier,
            ticket_count: results.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapImprovement {
    /// `before.total_gaps - after.total_gaps`
    pub gaps_closed: i64,
    pub similarity_lift: f32,

    /// Share of "before" gaps closed, in percent
    pub pct_improvement: f32,
}

impl GapImprovement {
    pub fn between(before: &GapSnapshot, after: &GapSnapshot) -> Self {
        let gaps_closed = before.total_gaps as i64 - after.total_gaps as i64;
        let pct_improvement = if before.total_gaps == 0 {
            0.0
        } else {
            gaps_closed as f32 / before.total_gaps as f32 * 100.0
        };

        Self {
            gaps_closed,
            similarity_lift: after.avg_resolution_similarity - before.avg_resolution_similarity,
            pct_improvement,
        }
    }
}

/// Result of the gap before/after protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeforeAfterReport {
    pub before: GapSnapshot,
    pub after: GapSnapshot,
    pub improvement: GapImprovement,
    pub learned_articles: usize,

    /// True when the learned articles came back without any embedding call
    pub restored_without_embedding: bool,
    pub evaluated_at: DateTime<Utc>,
}

/// One ground-truth question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalQuestion {
    pub question_text: String,
    pub target_id: String,
    pub answer_type: Partition,

    #[serde(default)]
    pub difficulty: String,
}

/// hit@k rates, keyed `"hit@{k}"`.
pub type HitRates = BTreeMap<String, f32>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalEvaluation {
    pub overall: HitRates,
    pub by_answer_type: BTreeMap<Partition, HitRates>,
    pub by_difficulty: BTreeMap<String, HitRates>,
    pub total_questions: usize,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalBeforeAfter {
    pub before: RetrievalEvaluation,
    pub after: RetrievalEvaluation,

    /// `after - before` per hit@k key
    pub hit_improvement: HitRates,
    pub learned_articles: usize,
    pub restored_without_embedding: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvaluation {
    pub accuracy: f32,
    pub per_class: BTreeMap<Partition, ClassMetrics>,

    /// actual → predicted → count
    pub confusion_matrix: BTreeMap<Partition, BTreeMap<Partition, usize>>,
    pub total_questions: usize,
}

fn hit_key(k: usize) -> String {
    format!("hit@{}", k)
}

fn rates(hits: &BTreeMap<usize, usize>, count: usize) -> HitRates {
    hits.iter()
        .map(|(k, h)| {
            let rate = if count == 0 { 0.0 } else { *h as f32 / count as f32 };
            (hit_key(*k), rate)
        })
        .collect()
}

/// hit@k over routed results (primary, then secondaries) for each `k`.
pub async fn evaluate_retrieval(
    router: &dyn QueryRouter,
    questions: &[EvalQuestion],
    ks: &[usize],
) -> AppResult<RetrievalEvaluation> {
    let max_k = ks.iter().copied().max().unwrap_or(0);
    let zero: BTreeMap<usize, usize> = ks.iter().map(|k| (*k, 0)).collect();

    let mut overall = zero.clone();
    let mut by_type: BTreeMap<Partition, (BTreeMap<usize, usize>, usize)> = BTreeMap::new();
    let mut by_difficulty: BTreeMap<String, (BTreeMap<usize, usize>, usize)> = BTreeMap::new();

    for question in questions {
        let routed = router.route_and_retrieve(&question.question_text, max_k).await?;
        let ids: Vec<&str> = routed.all_results().map(|r| r.doc_id.as_str()).collect();

        let type_entry = by_type
            .entry(question.answer_type)
            .or_insert_with(|| (zero.clone(), 0));
        type_entry.1 += 1;
        let difficulty_entry = by_difficulty
            .entry(question.difficulty.clone())
            .or_insert_with(|| (zero.clone(), 0));
        difficulty_entry.1 += 1;

        for &k in ks {
            if ids.iter().take(k).any(|id| *id == question.target_id) {
                *overall.entry(k).or_insert(0) += 1;
                *type_entry.0.entry(k).or_insert(0) += 1;
                *difficulty_entry.0.entry(k).or_insert(0) += 1;
            }
        }
    }

    let evaluation = RetrievalEvaluation {
        overall: rates(&overall, questions.len()),
        by_answer_type: by_type
            .into_iter()
            .map(|(p, (hits, count))| (p, rates(&hits, count)))
            .collect(),
        by_difficulty: by_difficulty
            .into_iter()
            .map(|(d, (hits, count))| (d, rates(&hits, count)))
            .collect(),
        total_questions: questions.len(),
        evaluated_at: Utc::now(),
    };

    tracing::info!(
        "Retrieval eval over {} questions: {:?}",
        evaluation.total_questions,
        evaluation.overall
    );
    Ok(evaluation)
}

/// Accuracy, confusion matrix and per-class metrics of the classifier.
pub async fn evaluate_classification(
    router: &dyn QueryRouter,
    questions: &[EvalQuestion],
) -> AppResult<ClassificationEvaluation> {
    let mut confusion: BTreeMap<Partition, BTreeMap<Partition, usize>> = Partition::ALL
        .into_iter()
        .map(|actual| (actual, Partition::ALL.into_iter().map(|p| (p, 0)).collect()))
        .collect();

    let mut correct = 0;
    for question in questions {
        let predicted = router.classify(&question.question_text).await?.predicted;
        if predicted == question.answer_type {
            correct += 1;
        }
        *confusion
            .entry(question.answer_type)
            .or_default()
            .entry(predicted)
            .or_insert(0) += 1;
    }

    let cell = |actual: Partition, predicted: Partition| {
        confusion
            .get(&actual)
            .and_then(|row| row.get(&predicted))
            .copied()
            .unwrap_or(0)
    };

    let per_class = Partition::ALL
        .into_iter()
        .map(|class| {
            let tp = cell(class, class);
            let others = class.others();
            let fp: usize = others.iter().map(|o| cell(*o, class)).sum();
            let fn_: usize = others.iter().map(|o| cell(class, *o)).sum();

            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            (
                class,
                ClassMetrics {
                    precision,
                    recall,
                    f1,
                    support: tp + fn_,
                },
            )
        })
        .collect();

    let evaluation = ClassificationEvaluation {
        accuracy: ratio(correct, questions.len()),
        per_class,
        confusion_matrix: confusion,
        total_questions: questions.len(),
    };

    tracing::info!(
        "Classification eval over {} questions: accuracy={:.3}",
        evaluation.total_questions,
        evaluation.accuracy
    );
    Ok(evaluation)
}

fn ratio(numerator: usize, denominator: usize) -> f32 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f32 / denominator as f32
    }
}

/// Keeps a set of ids excluded from the index until restored or dropped.
///
/// Dropping an armed guard clears the exclusion synchronously.
#[derive(Debug)]
pub struct ExclusionGuard<'a> {
    index: &'a PartitionedIndex,
    ids: Vec<String>,
    armed: bool,
}

impl<'a> ExclusionGuard<'a> {
    /// Exclude `docs` from `index`.
    pub fn exclude(index: &'a PartitionedIndex, docs: &[Document]) -> Self {
        let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
        index.remove(&ids);
        Self {
            index,
            ids,
            armed: true,
        }
    }

    /// Put the documents back through `add` and disarm the guard.
    ///
    /// If `add` fails the guard stays armed and the drop clears the
    /// exclusion instead.
    pub async fn restore(mut self, docs: Vec<Document>) -> AppResult<AddOutcome> {
        let outcome = self.index.add(docs).await?;
        self.armed = false;
        Ok(outcome)
    }
}

impl Drop for ExclusionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let restored = self.index.unexclude(&self.ids);
            tracing::warn!(
                "Evaluation interrupted, cleared exclusion of {} documents",
                restored
            );
        }
    }
}

/// Runs the before/after protocol over gaps and retrieval.
#[derive(Clone)]
pub struct SelfLearningEvaluator {
    index: Arc<PartitionedIndex>,
    detector: GapDetector,
    router: Arc<dyn QueryRouter>,
    learned_source_type: String,
}

impl SelfLearningEvaluator {
    pub fn new(
        index: Arc<PartitionedIndex>,
        detector: GapDetector,
        router: Arc<dyn QueryRouter>,
        learned_source_type: impl Into<String>,
    ) -> Self {
        Self {
            index,
            detector,
            router,
            learned_source_type: learned_source_type.into(),
        }
    }

    /// Live KB articles whose `source_type` marks them as learned.
    pub fn learned_documents(&self) -> Vec<Document> {
        self.index
            .documents(Partition::Kb)
            .into_iter()
            .filter(|d| d.metadata_value("source_type") == Some(self.learned_source_type.as_str()))
            .collect()
    }

    /// Gap scan with and without the learned articles.
    pub async fn before_after(&self) -> AppResult<BeforeAfterReport> {
        let learned = self.learned_documents();
        tracing::info!("Identified {} learned KB articles", learned.len());

        let after = GapSnapshot::from_results(&self.detector.scan_all_tickets().await?);

        let guard = ExclusionGuard::exclude(&self.index, &learned);
        let before = GapSnapshot::from_results(&self.detector.scan_all_tickets().await?);
        let outcome = guard.restore(learned.clone()).await?;

        let restored_without_embedding = check_restore(&outcome);
        let improvement = GapImprovement::between(&before, &after);

        tracing::info!(
            "Gaps closed: {} ({:.1}% improvement), similarity lift {:.4}",
            improvement.gaps_closed,
            improvement.pct_improvement,
            improvement.similarity_lift
        );

        Ok(BeforeAfterReport {
            before,
            after,
            improvement,
            learned_articles: learned.len(),
            restored_without_embedding,
            evaluated_at: Utc::now(),
        })
    }

    /// hit@k with and without the learned articles.
    pub async fn retrieval_before_after(
        &self,
        questions: &[EvalQuestion],
        ks: &[usize],
    ) -> AppResult<RetrievalBeforeAfter> {
        let learned = self.learned_documents();

        let after = evaluate_retrieval(self.router.as_ref(), questions, ks).await?;

        let guard = ExclusionGuard::exclude(&self.index, &learned);
        let before = evaluate_retrieval(self.router.as_ref(), questions, ks).await?;
        let outcome = guard.restore(learned.clone()).await?;

        let hit_improvement = after
            .overall
            .iter()
            .map(|(key, rate)| {
                let base = before.overall.get(key).copied().unwrap_or(0.0);
                (key.clone(), rate - base)
            })
            .collect();

        Ok(RetrievalBeforeAfter {
            before,
            after,
            hit_improvement,
            learned_articles: learned.len(),
            restored_without_embedding: check_restore(&outcome),
        })
    }

    pub async fn evaluate_retrieval(
        &self,
        questions: &[EvalQuestion],
        ks: &[usize],
    ) -> AppResult<RetrievalEvaluation> {
        evaluate_retrieval(self.router.as_ref(), questions, ks).await
    }

    pub async fn evaluate_classification(
        &self,
        questions: &[EvalQuestion],
    ) -> AppResult<ClassificationEvaluation> {
        evaluate_classification(self.router.as_ref(), questions).await
    }
}

fn check_restore(outcome: &AddOutcome) -> bool {
    if outcome.embedded.is_empty() {
        true
    } else {
        tracing::warn!(
            "Restoring learned articles embedded {} documents",
            outcome.embedded.len()
        );
        false
    }
}
