//! Partitioned support-document retrieval and knowledge-gap detection.
//!
//! Documents are split into KB, SCRIPT and TICKET partitions, each with its
//! own similarity index. On top of the index sit a query router, a gap
//! detector with emerging-issue clustering, and a before/after evaluator
//! for learned KB articles.

pub mod config;
pub mod embeddings;
pub mod evaluation;
pub mod gaps;
pub mod index;
pub mod router;
pub mod store;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{load_config, EngineConfig};
pub use embeddings::{create_provider, EmbeddingConfig, EmbeddingEngine, EmbeddingProvider};
pub use evaluation::{
    BeforeAfterReport, ClassificationEvaluation, EvalQuestion, RetrievalBeforeAfter,
    RetrievalEvaluation, SelfLearningEvaluator,
};
pub use gaps::{detect_emerging_issues, GapDetector};
pub use index::{AddOutcome, IndexStats, PartitionedIndex};
pub use router::{Classification, KeywordRouter, QueryRouter, RoutedResults};
pub use types::{
    CorpusMatch, Document, EmergingIssue, GapDetectionResult, Partition, RetrievalResult,
    TicketRecord,
};
