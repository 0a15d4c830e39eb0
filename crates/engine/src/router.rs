//! Query classification and routing.
//!
//! A query is scored against each partition by fusing keyword-signal hits
//! with the partition's top-1 similarity:
//!
//! ```text
//! keyword   = min(hits / 3, 1)
//! retrieval = top-1 cosine similarity (0 for an empty partition)
//! combined  = 0.4 * keyword + 0.6 * retrieval
//! ```
//!
//! The partition with the highest combined score is primary. Ties go to
//! the first partition in [`TIE_BREAK_ORDER`].

use crate::config::RetrievalConfig;
use crate::index::PartitionedIndex;
use crate::types::{Partition, RetrievalResult};
use async_trait::async_trait;
use meridian_core::AppResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

const KEYWORD_WEIGHT: f32 = 0.4;
const RETRIEVAL_WEIGHT: f32 = 0.6;
const HITS_FOR_FULL_SCORE: f32 = 3.0;

/// Priority among partitions with equal combined scores.
pub const TIE_BREAK_ORDER: [Partition; 3] = [Partition::Script, Partition::Kb, Partition::Ticket];

const SCRIPT_SIGNALS: &[&str] = &[
    "script",
    "backend",
    "run query",
    "data fix",
    "sql",
    "database",
    "backend fix",
    "data sync",
    "batch",
    "execute",
    "stored procedure",
    "update query",
    "sync issue",
    "data inconsistency",
    "advance property date",
    "date advance",
    "tracs",
    "hap",
    "voucher",
    "certification",
    "move-in",
    "move-out",
    "move in",
    "move out",
    "tier 3",
    "escalat",
    "backend data",
    "remediation",
    "workflow block",
    "data-fix",
    "backend correction",
];

const KB_SIGNALS: &[&str] = &[
    "how to",
    "how do i",
    "steps to",
    "guide",
    "walkthrough",
    "tutorial",
    "instructions",
    "process",
    "configure",
    "setup",
    "set up",
    "edit",
    "update",
    "change",
    "navigate",
    "where do i",
    "screen",
    "checklist",
    "optional",
    "required",
    "explain how",
    "what is the process",
    "can you explain",
];

const TICKET_SIGNALS: &[&str] = &[
    "resolution",
    "what was done",
    "similar case",
    "past case",
    "how was it resolved",
    "previous ticket",
    "what fixed",
    "resolved before",
    "prior incident",
    "what was the resolution",
    "in similar cases",
    "site:",
];

fn signals(partition: Partition) -> &'static [&'static str] {
    match partition {
        Partition::Kb => KB_SIGNALS,
        Partition::Script => SCRIPT_SIGNALS,
        Partition::Ticket => TICKET_SIGNALS,
    }
}

/// Score breakdown for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionScore {
    pub keyword: f32,
    pub retrieval: f32,
    pub combined: f32,
}

impl PartitionScore {
    pub fn new(keyword: f32, retrieval: f32) -> Self {
        Self {
            keyword,
            retrieval,
            combined: KEYWORD_WEIGHT * keyword + RETRIEVAL_WEIGHT * retrieval,
        }
    }
}

/// Outcome of classifying one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub predicted: Partition,
    pub scores: BTreeMap<Partition, PartitionScore>,
}

impl Classification {
    /// Pick the best-scoring partition, breaking ties by [`TIE_BREAK_ORDER`].
    pub fn from_scores(scores: BTreeMap<Partition, PartitionScore>) -> Self {
        let max = scores
            .values()
            .map(|s| s.combined)
            .fold(f32::NEG_INFINITY, f32::max);

        let predicted = TIE_BREAK_ORDER
            .into_iter()
            .find(|p| scores.get(p).is_some_and(|s| s.combined == max))
            .unwrap_or(TIE_BREAK_ORDER[0]);

        Self { predicted, scores }
    }

    pub fn combined(&self, partition: Partition) -> f32 {
        self.scores.get(&partition).map_or(0.0, |s| s.combined)
    }
}

/// Primary results from the predicted partition plus secondary context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedResults {
    pub query: String,
    pub classification: Classification,
    pub primary: Vec<RetrievalResult>,
    pub secondary: BTreeMap<Partition, Vec<RetrievalResult>>,
}

impl RoutedResults {
    pub fn predicted(&self) -> Partition {
        self.classification.predicted
    }

    /// Primary results followed by secondaries in tie-break order.
    pub fn all_results(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.primary.iter().chain(
            TIE_BREAK_ORDER
                .iter()
                .filter_map(|p| self.secondary.get(p))
                .flatten(),
        )
    }
}

/// Chooses a primary partition for a question and retrieves from it.
#[async_trait]
pub trait QueryRouter: Send + Sync {
    async fn classify(&self, query: &str) -> AppResult<Classification>;

    async fn route_and_retrieve(&self, query: &str, top_k: usize) -> AppResult<RoutedResults>;
}

/// Keyword-signal plus top-1 similarity router.
#[derive(Debug, Clone)]
pub struct KeywordRouter {
    index: Arc<PartitionedIndex>,
    secondary_k: usize,
}

impl KeywordRouter {
    pub fn new(index: Arc<PartitionedIndex>, config: &RetrievalConfig) -> Self {
        Self {
            index,
            secondary_k: config.secondary_k,
        }
    }

    /// Blank queries map to the zero vector instead of calling the provider.
    async fn embed(&self, query: &str) -> AppResult<Vec<f32>> {
        if query.trim().is_empty() {
            return Ok(vec![0.0; self.index.embedder().dimensions()]);
        }
        self.index.embed_query(query).await
    }

    async fn classify_embedding(&self, query: &str, embedding: &[f32]) -> AppResult<Classification> {
        let keyword = keyword_scores(query);
        let none = HashSet::new();

        let mut scores = BTreeMap::new();
        for partition in Partition::ALL {
            let top = self.index.search(embedding, 1, &[partition], &none).await?;
            let retrieval = top.first().map_or(0.0, |r| r.score);
            scores.insert(partition, PartitionScore::new(keyword[&partition], retrieval));
        }

        let classification = Classification::from_scores(scores);
        tracing::debug!(
            "Classified query as {}: {:?}",
            classification.predicted,
            classification.scores
        );
        Ok(classification)
    }
}

#[async_trait]
impl QueryRouter for KeywordRouter {
    async fn classify(&self, query: &str) -> AppResult<Classification> {
        let embedding = self.embed(query).await?;
        self.classify_embedding(query, &embedding).await
    }

    async fn route_and_retrieve(&self, query: &str, top_k: usize) -> AppResult<RoutedResults> {
        let embedding = self.embed(query).await?;
        let classification = self.classify_embedding(query, &embedding).await?;
        let none = HashSet::new();

        let primary = self
            .index
            .search(&embedding, top_k, &[classification.predicted], &none)
            .await?;

        let mut secondary = BTreeMap::new();
        for partition in classification.predicted.others() {
            let hits = self
                .index
                .search(&embedding, self.secondary_k, &[partition], &none)
                .await?;
            secondary.insert(partition, hits);
        }

        Ok(RoutedResults {
            query: query.to_string(),
            classification,
            primary,
            secondary,
        })
    }
}

/// Case-insensitive substring hits per partition, scaled to [0, 1].
pub fn keyword_scores(query: &str) -> BTreeMap<Partition, f32> {
    let lower = query.to_lowercase();
    Partition::ALL
        .into_iter()
        .map(|p| {
            let hits = signals(p).iter().filter(|s| lower.contains(*s)).count();
            (p, (hits as f32 / HITS_FOR_FULL_SCORE).min(1.0))
        })
        .collect()
}
