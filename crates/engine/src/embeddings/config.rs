//! Embedding configuration types.

use meridian_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Embedding provider configuration (`embedding:` section of config.yaml).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" (local lexical) or "openai" (remote dense)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier; also keys the persisted query cache and stores
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Maximum texts per provider request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Texts longer than this many characters are truncated before submission
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Base URL for remote providers (e.g. "https://api.openai.com/v1")
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding the API key for remote providers
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request timeout for remote providers
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first failed attempt on transient errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String {
    "trigram".to_string()
}

fn default_model() -> String {
    "trigram-v1".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_batch_size() -> usize {
    250
}

fn default_max_text_chars() -> usize {
    8000
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            max_text_chars: default_max_text_chars(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl EmbeddingConfig {
    /// Check the values a provider cannot work without.
    pub fn validate(&self) -> AppResult<()> {
        if self.dimensions == 0 {
            return Err(AppError::Config(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(AppError::Config(
                "embedding.batch_size must be greater than zero".to_string(),
            ));
        }

        if self.max_text_chars == 0 {
            return Err(AppError::Config(
                "embedding.max_text_chars must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
