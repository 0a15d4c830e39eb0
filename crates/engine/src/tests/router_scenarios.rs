use super::support::{doc, index_over, StaticProvider};
use crate::config::RetrievalConfig;
use crate::router::{KeywordRouter, QueryRouter};
use crate::types::Partition;
use std::sync::Arc;

const SCRIPT_QUERY: &str = "run backend sql script fix";

fn provider() -> Arc<StaticProvider> {
    StaticProvider::new(
        5,
        &[
            ("kb one", vec![1.0, 0.0, 0.0, 0.0, 0.0]),
            ("kb two", vec![0.0, 0.0, 0.0, 1.0, 0.0]),
            ("kb three", vec![0.6, 0.0, 0.0, 0.8, 0.0]),
            ("script one", vec![0.0, 1.0, 0.0, 0.0, 0.0]),
            ("script two", vec![0.0, 0.6, 0.0, 0.8, 0.0]),
            ("ticket one", vec![0.0, 0.0, 1.0, 0.0, 0.0]),
            (SCRIPT_QUERY, vec![0.3, 0.8, 0.0, 0.0, 0.27f32.sqrt()]),
        ],
    )
}

async fn router(with_tickets: bool) -> KeywordRouter {
    let mut docs = vec![
        doc("KB-1", "kb one"),
        doc("KB-2", "kb two"),
        doc("KB-3", "kb three"),
        doc("SCRIPT-1", "script one"),
        doc("SCRIPT-2", "script two"),
    ];
    if with_tickets {
        docs.push(doc("CS-1", "ticket one"));
    }

    let index = index_over(provider(), None);
    index.build(docs).await.unwrap();
    KeywordRouter::new(index, &RetrievalConfig::default())
}

#[tokio::test]
async fn test_script_signals_and_similarity_pick_script() {
    let router = router(true).await;

    let classification = router.classify(SCRIPT_QUERY).await.unwrap();

    assert_eq!(classification.predicted, Partition::Script);
    let script = classification.scores[&Partition::Script];
    assert_eq!(script.keyword, 1.0);
    assert!((script.retrieval - 0.8).abs() < 1e-5);
    assert!((script.combined - 0.88).abs() < 1e-5);
    assert!((classification.combined(Partition::Kb) - 0.18).abs() < 1e-5);
    assert!(classification.combined(Partition::Ticket).abs() < 1e-5);
}

#[tokio::test]
async fn test_route_and_retrieve_splits_primary_and_secondary() {
    let router = router(true).await;

    let routed = router.route_and_retrieve(SCRIPT_QUERY, 5).await.unwrap();

    assert_eq!(routed.predicted(), Partition::Script);
    let primary: Vec<&str> = routed.primary.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(primary, vec!["SCRIPT-1", "SCRIPT-2"]);

    assert_eq!(routed.secondary.len(), 2);
    assert!(!routed.secondary.contains_key(&Partition::Script));
    let kb: Vec<&str> = routed.secondary[&Partition::Kb]
        .iter()
        .map(|r| r.doc_id.as_str())
        .collect();
    assert_eq!(kb, vec!["KB-1", "KB-3"]);
    assert_eq!(routed.secondary[&Partition::Ticket].len(), 1);

    let all: Vec<&str> = routed.all_results().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(all, vec!["SCRIPT-1", "SCRIPT-2", "KB-1", "KB-3", "CS-1"]);
}

#[tokio::test]
async fn test_blank_query_falls_back_to_tie_break() {
    let router = router(true).await;

    for query in ["", "   "] {
        let classification = router.classify(query).await.unwrap();
        assert_eq!(classification.predicted, Partition::Script);
        assert!(classification.scores.values().all(|s| s.combined == 0.0));
    }
}

#[tokio::test]
async fn test_empty_partition_scores_zero() {
    let router = router(false).await;

    let routed = router.route_and_retrieve(SCRIPT_QUERY, 3).await.unwrap();

    assert_eq!(routed.classification.scores[&Partition::Ticket].retrieval, 0.0);
    assert!(routed.secondary[&Partition::Ticket].is_empty());
}

#[tokio::test]
async fn test_router_as_trait_object() {
    let router: Arc<dyn QueryRouter> = Arc::new(router(true).await);
    let classification = router.classify(SCRIPT_QUERY).await.unwrap();
    assert_eq!(classification.predicted, Partition::Script);
}
