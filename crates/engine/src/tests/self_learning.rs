//! Gap scanning and the before/after protocol over a small fixture.

use super::support::{doc, index_over, ticket, StaticProvider};
use crate::config::RetrievalConfig;
use crate::evaluation::{EvalQuestion, ExclusionGuard, SelfLearningEvaluator};
use crate::gaps::{detect_emerging_issues, GapDetector};
use crate::index::PartitionedIndex;
use crate::router::{KeywordRouter, QueryRouter};
use crate::types::{Partition, TicketRecord};
use meridian_core::{AppError, AppResult};
use std::sync::Arc;

const LEARNED: &str = "SYNTH_FROM_TICKET";

fn provider() -> Arc<StaticProvider> {
    StaticProvider::new(
        4,
        &[
            ("seed article", vec![1.0, 0.0, 0.0, 0.0]),
            ("learned article", vec![0.0, 1.0, 0.0, 0.0]),
            ("reset the voucher", vec![0.0, 1.0, 0.0, 0.0]),
            ("edit the screen", vec![1.0, 0.0, 0.0, 0.0]),
            ("unknown fix", vec![0.0, 0.0, 1.0, 0.0]),
            ("other unknown fix", vec![0.0, 0.0, 0.6, 0.8]),
            ("learned question", vec![0.0, 1.0, 0.0, 0.0]),
        ],
    )
}

struct Fixture {
    index: Arc<PartitionedIndex>,
    detector: GapDetector,
    evaluator: SelfLearningEvaluator,
}

async fn fixture() -> Fixture {
    let docs = vec![
        doc("KB-1", "seed article").with_metadata("source_type", "SEED_KB"),
        doc("KB-100", "learned article").with_metadata("source_type", LEARNED),
        ticket("CS-1", "Voucher stuck", "reset the voucher", "Data", "Vouchers"),
        ticket("CS-2", "Screen question", "edit the screen", "How-to", "Leasing"),
        ticket("CS-3", "Sync failed", "unknown fix", "Data", "Accounting"),
        ticket("CS-4", "Sync failed again", "other unknown fix", "Data", "Accounting"),
    ];

    let index = index_over(provider(), None);
    index.build(docs).await.unwrap();

    let tickets: Vec<TicketRecord> = index
        .documents(Partition::Ticket)
        .iter()
        .map(|d| TicketRecord::from_document(d).unwrap())
        .collect();
    let detector = GapDetector::new(index.clone(), tickets, 0.40);
    let router: Arc<dyn QueryRouter> =
        Arc::new(KeywordRouter::new(index.clone(), &RetrievalConfig::default()));
    let evaluator = SelfLearningEvaluator::new(index.clone(), detector.clone(), router, LEARNED);

    Fixture {
        index,
        detector,
        evaluator,
    }
}

#[tokio::test]
async fn test_check_ticket() {
    let f = fixture().await;

    let covered = f.detector.check_ticket("CS-1").await.unwrap();
    assert!(!covered.is_gap);
    assert_eq!(covered.best_matching_kb_id, "KB-100");
    assert!((covered.resolution_similarity - 1.0).abs() < 1e-5);

    let gap = f.detector.check_ticket("CS-3").await.unwrap();
    assert!(gap.is_gap);
    assert_eq!(gap.category, "Data");
    assert_eq!(gap.tier, 2);

    assert_eq!(f.detector.check_ticket("CS-3").await.unwrap(), gap);
}

#[tokio::test]
async fn test_unknown_ticket_is_not_found() {
    let f = fixture().await;
    assert!(matches!(
        f.detector.check_ticket("CS-404").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_scan_sorted_worst_first() {
    let f = fixture().await;

    let results = f.detector.scan_all_tickets().await.unwrap();
    assert_eq!(results.len(), 4);
    for pair in results.windows(2) {
        assert!(pair[0].resolution_similarity <= pair[1].resolution_similarity);
    }
    assert_eq!(results.iter().filter(|r| r.is_gap).count(), 2);

    let issues = detect_emerging_issues(&results, 2);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].module, "Accounting");
    assert_eq!(issues[0].ticket_count, 2);
    assert!(detect_emerging_issues(&results, 3).is_empty());
}

#[tokio::test]
async fn test_scan_with_no_tickets_is_empty() {
    let f = fixture().await;
    let empty = GapDetector::new(f.index.clone(), Vec::new(), 0.40);
    assert!(empty.scan_all_tickets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_before_after_closes_gaps_and_restores_index() {
    let f = fixture().await;
    let ids_before = f.index.document_ids();

    let report = f.evaluator.before_after().await.unwrap();

    assert_eq!(report.learned_articles, 1);
    assert!(report.before.total_gaps >= report.after.total_gaps);
    assert_eq!(report.before.total_gaps, 3);
    assert_eq!(report.after.total_gaps, 2);
    assert_eq!(report.improvement.gaps_closed, 1);
    assert!(report.improvement.similarity_lift > 0.0);
    assert!(report.restored_without_embedding);

    assert_eq!(f.index.document_ids(), ids_before);
    assert!(f.index.get("KB-100").is_some());
}

#[tokio::test]
async fn test_guard_restores_after_error() {
    let f = fixture().await;
    let ids_before = f.index.document_ids();
    let learned = f.evaluator.learned_documents();

    let result: AppResult<()> = async {
        let _guard = ExclusionGuard::exclude(&f.index, &learned);
        assert!(f.index.get("KB-100").is_none());
        f.detector.check_ticket("CS-404").await?;
        Ok::<(), AppError>(())
    }
    .await;

    assert!(result.is_err());
    assert_eq!(f.index.document_ids(), ids_before);
}

#[tokio::test]
async fn test_retrieval_before_after() {
    let f = fixture().await;
    let questions = vec![EvalQuestion {
        question_text: "learned question".to_string(),
        target_id: "KB-100".to_string(),
        answer_type: Partition::Kb,
        difficulty: "Easy".to_string(),
    }];

    let comparison = f
        .evaluator
        .retrieval_before_after(&questions, &[1, 5])
        .await
        .unwrap();

    assert_eq!(comparison.after.overall["hit@1"], 1.0);
    assert_eq!(comparison.before.overall["hit@1"], 0.0);
    assert_eq!(comparison.hit_improvement["hit@1"], 1.0);
    assert_eq!(comparison.after.by_difficulty["Easy"]["hit@5"], 1.0);
    assert!(comparison.restored_without_embedding);
    assert!(f.index.get("KB-100").is_some());

    let classification = f.evaluator.evaluate_classification(&questions).await.unwrap();
    assert_eq!(classification.accuracy, 1.0);
    assert_eq!(classification.per_class[&Partition::Kb].support, 1);
    assert_eq!(classification.confusion_matrix[&Partition::Kb][&Partition::Kb], 1);
}
