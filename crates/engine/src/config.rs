//! Engine configuration management.
//!
//! Reads the `embedding`, `index`, `gaps` and `retrieval` sections of the
//! workspace config file. Every field has a default, so a missing file or a
//! partial section is valid.

use crate::embeddings::EmbeddingConfig;
use meridian_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub gaps: GapConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Partitioned index settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// Persist partition stores and the query cache to the cache directory
    #[serde(default = "default_persist")]
    pub persist: bool,

    /// Characters of `search_text` hashed into a partition fingerprint
    #[serde(default = "default_fingerprint_prefix_chars")]
    pub fingerprint_prefix_chars: usize,

    /// Flush the query cache after this many new entries
    #[serde(default = "default_cache_flush_every")]
    pub cache_flush_every: usize,

    /// Characters of a document body copied into a retrieval result
    #[serde(default = "default_body_preview_chars")]
    pub body_preview_chars: usize,
}

/// Gap detection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapConfig {
    /// A ticket is a gap when its resolution similarity is below this
    #[serde(default = "default_gap_threshold")]
    pub threshold: f32,

    /// Smallest (category, module) group reported as an emerging issue
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// `source_type` metadata value marking learned KB articles
    #[serde(default = "default_learned_source_type")]
    pub learned_source_type: String,
}

/// Query routing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Results fetched from each non-primary partition
    #[serde(default = "default_secondary_k")]
    pub secondary_k: usize,
}

fn default_persist() -> bool {
    true
}

fn default_fingerprint_prefix_chars() -> usize {
    256
}

fn default_cache_flush_every() -> usize {
    50
}

fn default_body_preview_chars() -> usize {
    2000
}

fn default_gap_threshold() -> f32 {
    0.40
}

fn default_min_cluster_size() -> usize {
    3
}

fn default_learned_source_type() -> String {
    "SYNTH_FROM_TICKET".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_secondary_k() -> usize {
    2
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist: default_persist(),
            fingerprint_prefix_chars: default_fingerprint_prefix_chars(),
            cache_flush_every: default_cache_flush_every(),
            body_preview_chars: default_body_preview_chars(),
        }
    }
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            threshold: default_gap_threshold(),
            min_cluster_size: default_min_cluster_size(),
            learned_source_type: default_learned_source_type(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            secondary_k: default_secondary_k(),
        }
    }
}

/// Load engine configuration from a YAML file.
///
/// A missing file yields the defaults.
pub fn load_config(config_path: &Path) -> AppResult<EngineConfig> {
    if !config_path.exists() {
        tracing::debug!(
            "No config file at {:?}, using default engine config",
            config_path
        );
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(config_path).map_err(|e| {
        AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let config: EngineConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;

    config.validate()?;

    tracing::debug!(
        "Loaded engine config from {:?}: provider={}, model={}, threshold={}",
        config_path,
        config.embedding.provider,
        config.embedding.model,
        config.gaps.threshold
    );
    Ok(config)
}

impl EngineConfig {
    pub fn validate(&self) -> AppResult<()> {
        self.embedding.validate()?;

        if !(0.0..=1.0).contains(&self.gaps.threshold) {
            return Err(AppError::Config(format!(
                "gaps.threshold must be within [0, 1], got {}",
                self.gaps.threshold
            )));
        }

        if self.gaps.min_cluster_size == 0 {
            return Err(AppError::Config(
                "gaps.min_cluster_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(&temp.path().join("config.yaml")).unwrap();

        assert_eq!(config, EngineConfig::default());
        assert!((config.gaps.threshold - 0.40).abs() < f32::EPSILON);
        assert_eq!(config.gaps.min_cluster_size, 3);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.secondary_k, 2);
    }

    #[test]
    fn test_load_partial_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "logging:\n  level: info\ngaps:\n  threshold: 0.55\nindex:\n  persist: false\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert!((config.gaps.threshold - 0.55).abs() < f32::EPSILON);
        assert_eq!(config.gaps.min_cluster_size, 3);
        assert!(!config.index.persist);
        assert_eq!(config.index.fingerprint_prefix_chars, 256);
        assert_eq!(config.embedding.provider, "trigram");
    }

    #[test]
    fn test_threshold_out_of_range() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "gaps:\n  threshold: 1.5\n").unwrap();

        assert!(matches!(load_config(&path), Err(AppError::Config(_))));
    }
}
