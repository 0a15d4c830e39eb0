//! Local lexical embedding provider.
//!
//! Hashes word and character-trigram features into a fixed number of
//! buckets. No model download and no network; the same text always maps to
//! the same vector, which makes it the default for offline use and tests.

use crate::embeddings::normalize;
use crate::embeddings::provider::EmbeddingProvider;
use meridian_core::AppResult;
use std::collections::{HashMap, HashSet};

const MODEL_NAME: &str = "trigram-v1";

const STOP_WORDS: &[&str] = &[
    "the", "is", "at", "which", "on", "a", "an", "as", "are", "was", "were", "for", "to", "of",
    "in", "and", "or", "but", "with", "by", "from", "this", "that", "be", "have", "has", "had",
    "it", "its", "their", "they", "them",
];

/// Hashed word + trigram embeddings.
#[derive(Debug)]
pub struct TrigramProvider {
    dimensions: usize,
    stop_words: HashSet<&'static str>,
}

impl TrigramProvider {
    /// Create a new trigram provider with the given number of buckets.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            stop_words: STOP_WORDS.iter().copied().collect(),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return embedding;
        }

        let lower = text.to_lowercase();
        let mut word_freq: HashMap<&str, u32> = HashMap::new();
        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 2 && !self.stop_words.contains(w))
        {
            *word_freq.entry(word).or_insert(0) += 1;
        }

        for (word, freq) in &word_freq {
            let freq = *freq as f32;

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let bucket = (fnv1a(trigram.as_bytes(), 0x9e37) as usize) % self.dimensions;
                embedding[bucket] += freq.sqrt();
            }

            let bucket = (fnv1a(word.as_bytes(), 0x51ed) as usize) % self.dimensions;
            embedding[bucket] += freq;
        }

        normalize(&mut embedding);
        embedding
    }
}

/// FNV-1a with a seed folded into the offset basis.
fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait::async_trait]
impl EmbeddingProvider for TrigramProvider {
    fn provider_name(&self) -> &str {
        "trigram"
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
