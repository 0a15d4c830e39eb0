//! Embedding engine for the partitioned index.
//!
//! Wraps one provider with the caller-side duties: truncation, batching,
//! re-normalization and the query-embedding cache.

pub mod cache;
pub mod config;
pub mod provider;
pub mod providers;

pub use cache::QueryEmbeddingCache;
pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};

use crate::types::truncate_chars;
use meridian_core::{AppError, AppResult};
use std::sync::{Arc, Mutex, PoisonError};

/// Provider plus query cache, shared by every partition.
#[derive(Debug)]
pub struct EmbeddingEngine {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_text_chars: usize,
    model_id: String,
    cache: Mutex<QueryEmbeddingCache>,
}

impl EmbeddingEngine {
    /// Create an engine with an in-memory query cache.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let model_id = Self::model_identifier(provider.as_ref());
        let cache = QueryEmbeddingCache::in_memory(model_id.clone());
        Self::with_cache(provider, config, cache)
    }

    /// Create an engine around an existing cache.
    ///
    /// A cache opened under another model identifier is emptied and
    /// rebound to the active model.
    pub fn with_cache(
        provider: Arc<dyn EmbeddingProvider>,
        config: &EmbeddingConfig,
        mut cache: QueryEmbeddingCache,
    ) -> Self {
        let model_id = Self::model_identifier(provider.as_ref());
        if cache.model_id() != model_id {
            tracing::info!(
                "Query cache built for '{}' but active model is '{}', starting empty",
                cache.model_id(),
                model_id
            );
            cache.rebind(model_id.clone());
        }

        Self {
            provider,
            batch_size: config.batch_size.max(1),
            max_text_chars: config.max_text_chars.max(1),
            model_id,
            cache: Mutex::new(cache),
        }
    }

    /// Identifier that ties persisted vectors to the model that made them.
    pub fn model_identifier(provider: &dyn EmbeddingProvider) -> String {
        format!(
            "{}:{}@{}",
            provider.provider_name(),
            provider.model_name(),
            provider.dimensions()
        )
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed documents in bounded batches, preserving input order.
    pub async fn embed_texts(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(
            "Embedding {} texts using provider '{}' (model: {})",
            texts.len(),
            self.provider.provider_name(),
            self.provider.model_name()
        );

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let truncated: Vec<String> = batch
                .iter()
                .map(|t| truncate_chars(t, self.max_text_chars))
                .collect();

            let vectors = self.provider.embed_batch(&truncated).await?;
            if vectors.len() != truncated.len() {
                return Err(AppError::Provider(format!(
                    "Provider returned {} embeddings for {} texts",
                    vectors.len(),
                    truncated.len()
                )));
            }

            for mut vector in vectors {
                self.check_dimensions(&vector)?;
                normalize(&mut vector);
                embeddings.push(vector);
            }
        }

        tracing::debug!(
            "Generated {} embeddings of dimension {}",
            embeddings.len(),
            self.dimensions()
        );
        Ok(embeddings)
    }

    /// Embed a query, consulting the cache first.
    pub async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        let key = truncate_chars(text, self.max_text_chars);

        let cached = self.lock_cache().get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let mut vector = self.provider.embed_one(&key).await?;
        self.check_dimensions(&vector)?;
        normalize(&mut vector);

        self.lock_cache().insert(key, vector.clone());
        Ok(vector)
    }

    /// Persist the query cache.
    pub fn flush_cache(&self) -> AppResult<()> {
        self.lock_cache().flush()
    }

    /// Number of cached query embeddings.
    pub fn cached_queries(&self) -> usize {
        self.lock_cache().len()
    }

    fn check_dimensions(&self, vector: &[f32]) -> AppResult<()> {
        if vector.len() != self.dimensions() {
            return Err(AppError::Provider(format!(
                "Embedding has dimension {}, expected {}",
                vector.len(),
                self.dimensions()
            )));
        }
        Ok(())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, QueryEmbeddingCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scale `v` to unit length in place. Zero vectors are left untouched.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::TrigramProvider;
    use tempfile::TempDir;

    fn engine(batch_size: usize) -> EmbeddingEngine {
        let config = EmbeddingConfig {
            batch_size,
            dimensions: 64,
            ..EmbeddingConfig::default()
        };
        EmbeddingEngine::new(Arc::new(TrigramProvider::new(64)), &config)
    }

    #[test]
    fn test_model_identifier() {
        let engine = engine(10);
        assert_eq!(engine.model_id(), "trigram:trigram-v1@64");
    }

    #[tokio::test]
    async fn test_embed_texts_across_batches() {
        let engine = engine(2);
        let texts: Vec<String> = (0..5).map(|i| format!("document number {}", i)).collect();

        let embeddings = engine.embed_texts(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 5);

        let single = engine.embed_texts(&texts[3..4]).await.unwrap();
        assert_eq!(embeddings[3], single[0]);
    }

    #[tokio::test]
    async fn test_embed_query_populates_cache() {
        let engine = engine(10);
        assert_eq!(engine.cached_queries(), 0);

        let first = engine.embed_query("voucher sync").await.unwrap();
        let second = engine.embed_query("voucher sync").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.cached_queries(), 1);
    }

    #[test]
    fn test_mismatched_cache_is_replaced() {
        let config = EmbeddingConfig::default();
        let mut stale = QueryEmbeddingCache::in_memory("other:model@3");
        stale.insert("q".to_string(), vec![1.0, 0.0, 0.0]);

        let engine =
            EmbeddingEngine::with_cache(Arc::new(TrigramProvider::new(384)), &config, stale);
        assert_eq!(engine.cached_queries(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_cache_still_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("query_cache.json");
        let config = EmbeddingConfig {
            dimensions: 64,
            ..EmbeddingConfig::default()
        };

        let stale = QueryEmbeddingCache::open(&path, "other:model@3", 0);
        let engine =
            EmbeddingEngine::with_cache(Arc::new(TrigramProvider::new(64)), &config, stale);
        engine.embed_query("voucher sync").await.unwrap();
        engine.flush_cache().unwrap();

        let reopened = QueryEmbeddingCache::open(&path, engine.model_id(), 0);
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_cache_does_not_fail_queries() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("cache");
        std::fs::write(&blocker, "file").unwrap();

        let provider = Arc::new(TrigramProvider::new(64));
        let model_id = EmbeddingEngine::model_identifier(provider.as_ref());
        let cache = QueryEmbeddingCache::open(blocker.join("query_cache.json"), model_id, 1);
        let config = EmbeddingConfig {
            dimensions: 64,
            ..EmbeddingConfig::default()
        };
        let engine = EmbeddingEngine::with_cache(provider, &config, cache);

        assert!(engine.embed_query("voucher sync").await.is_ok());
        assert!(engine.embed_query("sync failed").await.is_ok());
        assert_eq!(engine.cached_queries(), 2);
        assert!(engine.flush_cache().is_err());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
