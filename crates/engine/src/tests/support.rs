//! Deterministic fixtures for index, router and evaluator tests.

use crate::config::IndexConfig;
use crate::embeddings::{EmbeddingConfig, EmbeddingEngine, EmbeddingProvider};
use crate::index::PartitionedIndex;
use crate::types::Document;
use meridian_core::{AppError, AppResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Provider returning fixed vectors per text and counting embedded texts.
///
/// Unknown texts embed to the zero vector.
#[derive(Debug)]
pub struct StaticProvider {
    model: String,
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl StaticProvider {
    pub fn new(dimensions: usize, vectors: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Self::with_model("static-v1", dimensions, vectors)
    }

    pub fn with_model(model: &str, dimensions: usize, vectors: &[(&str, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            dimensions,
            vectors: vectors
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    /// Number of texts embedded so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for StaticProvider {
    fn provider_name(&self) -> &str {
        "static"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Provider("provider unavailable".to_string()));
        }

        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimensions])
            })
            .collect())
    }
}

/// Unbuilt index over `provider`, optionally persisted to `store_dir`.
pub fn index_over(provider: Arc<StaticProvider>, store_dir: Option<PathBuf>) -> Arc<PartitionedIndex> {
    let config = EmbeddingConfig {
        provider: "static".to_string(),
        dimensions: provider.dimensions(),
        ..EmbeddingConfig::default()
    };
    let engine = EmbeddingEngine::new(provider, &config);
    Arc::new(PartitionedIndex::new(
        Arc::new(engine),
        &IndexConfig::default(),
        store_dir,
    ))
}

/// Document whose title, body and search text are all `text`.
pub fn doc(id: &str, text: &str) -> Document {
    Document::new(id, text, text, text).unwrap()
}

pub fn ticket(id: &str, subject: &str, resolution: &str, category: &str, module: &str) -> Document {
    Document::new(id, subject, resolution, format!("{} {}", subject, resolution))
        .unwrap()
        .with_metadata("description", "")
        .with_metadata("tier", "2")
        .with_metadata("category", category)
        .with_metadata("module", module)
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
