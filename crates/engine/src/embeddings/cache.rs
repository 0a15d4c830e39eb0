//! Persisted query-embedding cache.
//!
//! Entries are keyed by the truncated query text. The file records the model
//! identifier it was filled under; a file written by any other model is
//! discarded as a whole on load, never merged.

use meridian_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    model: String,
    entries: HashMap<String, Vec<f32>>,
}

/// Query text → embedding map bound to one embedding model.
#[derive(Debug)]
pub struct QueryEmbeddingCache {
    model_id: String,
    entries: HashMap<String, Vec<f32>>,
    path: Option<PathBuf>,
    flush_every: usize,

    /// New entries since the last auto-flush attempt
    unflushed: usize,

    /// Entries not yet written to disk
    dirty: bool,
}

impl QueryEmbeddingCache {
    /// A cache that is never written to disk.
    pub fn in_memory(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            entries: HashMap::new(),
            path: None,
            flush_every: 0,
            unflushed: 0,
            dirty: false,
        }
    }

    /// Open the cache file at `path`, starting empty when the file is
    /// absent, unreadable, or was written under a different model.
    pub fn open(path: impl Into<PathBuf>, model_id: impl Into<String>, flush_every: usize) -> Self {
        let path = path.into();
        let model_id = model_id.into();

        let entries = match load_file(&path) {
            Ok(Some(file)) if file.model == model_id => {
                info!(
                    "Loaded {} cached query embeddings from {:?}",
                    file.entries.len(),
                    path
                );
                file.entries
            }
            Ok(Some(file)) => {
                info!(
                    "Query cache model changed ({} -> {}), discarding {} entries",
                    file.model,
                    model_id,
                    file.entries.len()
                );
                HashMap::new()
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("Ignoring unreadable query cache at {:?}: {}", path, e);
                HashMap::new()
            }
        };

        Self {
            model_id,
            entries,
            path: Some(path),
            flush_every,
            unflushed: 0,
            dirty: false,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Vec<f32>> {
        self.entries.get(key)
    }

    /// Drop every entry and rebind the cache to `model_id`, keeping the
    /// file location so the next flush overwrites the stale file.
    pub fn rebind(&mut self, model_id: impl Into<String>) {
        self.model_id = model_id.into();
        self.entries.clear();
        self.unflushed = 0;
        self.dirty = self.path.is_some();
    }

    /// Insert an entry, flushing once `flush_every` new entries accumulated.
    ///
    /// A failed auto-flush is logged and the entry stays in memory; the
    /// next explicit [`Self::flush`] retries the write.
    pub fn insert(&mut self, key: String, embedding: Vec<f32>) {
        if self.entries.insert(key, embedding).is_none() {
            self.unflushed += 1;
            self.dirty = true;
        }

        if self.flush_every > 0 && self.unflushed >= self.flush_every {
            self.unflushed = 0;
            if let Err(e) = self.flush() {
                warn!("Query cache auto-flush failed: {}", e);
            }
        }
    }

    /// Write pending entries to disk. No-op for in-memory caches.
    pub fn flush(&mut self) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty && path.exists() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = CacheFile {
            model: self.model_id.clone(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec(&file)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;

        debug!(
            "Flushed {} query embeddings to {:?}",
            self.entries.len(),
            path
        );
        self.unflushed = 0;
        self.dirty = false;
        Ok(())
    }
}

fn load_file(path: &Path) -> AppResult<Option<CacheFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    let file: CacheFile = serde_json::from_slice(&bytes).map_err(|e| {
        AppError::Serialization(format!("Invalid query cache {:?}: {}", path, e))
    })?;
    Ok(Some(file))
}
