//! Partitioned retrieval index.
//!
//! One [`FlatIndex`] per [`Partition`], each behind its own async lock so
//! writers on one partition never block readers of another. Removal is
//! virtual: ids go into a global exclusion set that every query path
//! consults, while their vectors stay stored so a later `add` can restore
//! them without embedding anything.

use crate::config::{EngineConfig, IndexConfig};
use crate::embeddings::{create_provider, EmbeddingEngine, QueryEmbeddingCache};
use crate::store::{PartitionStore, StoreMeta};
use crate::types::{truncate_chars, CorpusMatch, Document, Partition, RetrievalResult};
use crate::vector_index::{FlatIndex, Neighbor, VectorIndex};
use futures::future::try_join_all;
use meridian_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::RwLock;

const QUERY_CACHE_FILE: &str = "query_cache.json";
const PARTITIONS_DIR: &str = "partitions";

/// What an `add` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOutcome {
    /// Previously excluded ids brought back without embedding
    pub restored: Vec<String>,

    /// Ids that went through the embedding provider
    pub embedded: Vec<String>,
}

/// Per-partition counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub partition: Partition,
    pub stored_vectors: usize,
    pub live_documents: usize,
}

/// Snapshot of index state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub built: bool,
    pub model: String,
    pub dimensions: usize,
    pub partitions: Vec<PartitionStats>,
    pub excluded: usize,
    pub cached_queries: usize,
}

/// Similarity index split by document partition.
#[derive(Debug)]
pub struct PartitionedIndex {
    embedder: Arc<EmbeddingEngine>,
    partitions: [RwLock<FlatIndex>; 3],
    documents: StdRwLock<HashMap<String, Document>>,
    excluded: StdRwLock<HashSet<String>>,
    built: AtomicBool,
    store_dir: Option<PathBuf>,
    fingerprint_prefix_chars: usize,
    body_preview_chars: usize,
}

fn slot(partition: Partition) -> usize {
    match partition {
        Partition::Kb => 0,
        Partition::Script => 1,
        Partition::Ticket => 2,
    }
}

/// Stable hash over the sorted (doc_id, search_text prefix) pairs.
pub fn partition_fingerprint<'a>(
    documents: impl IntoIterator<Item = &'a Document>,
    prefix_chars: usize,
) -> String {
    let mut pairs: Vec<(&str, String)> = documents
        .into_iter()
        .map(|d| (d.id.as_str(), truncate_chars(&d.search_text, prefix_chars)))
        .collect();
    pairs.sort();

    let mut hasher = Sha256::new();
    for (id, prefix) in &pairs {
        hasher.update(id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(prefix.as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

impl PartitionedIndex {
    /// Create an empty, unbuilt index.
    ///
    /// With a `store_dir`, each partition is persisted to its own SQLite
    /// file there and reused across builds while its fingerprint holds.
    pub fn new(embedder: Arc<EmbeddingEngine>, config: &IndexConfig, store_dir: Option<PathBuf>) -> Self {
        let dims = embedder.dimensions();
        Self {
            embedder,
            partitions: [
                RwLock::new(FlatIndex::new(dims)),
                RwLock::new(FlatIndex::new(dims)),
                RwLock::new(FlatIndex::new(dims)),
            ],
            documents: StdRwLock::new(HashMap::new()),
            excluded: StdRwLock::new(HashSet::new()),
            built: AtomicBool::new(false),
            store_dir,
            fingerprint_prefix_chars: config.fingerprint_prefix_chars,
            body_preview_chars: config.body_preview_chars,
        }
    }

    /// Create an index from engine configuration, persisting under
    /// `cache_dir` when `index.persist` is set.
    pub fn from_config(config: &EngineConfig, cache_dir: &Path) -> AppResult<Self> {
        let provider = create_provider(&config.embedding)?;
        let model_id = EmbeddingEngine::model_identifier(provider.as_ref());

        let (cache, store_dir) = if config.index.persist {
            (
                QueryEmbeddingCache::open(
                    cache_dir.join(QUERY_CACHE_FILE),
                    model_id,
                    config.index.cache_flush_every,
                ),
                Some(cache_dir.join(PARTITIONS_DIR)),
            )
        } else {
            (QueryEmbeddingCache::in_memory(model_id), None)
        };

        let embedder = EmbeddingEngine::with_cache(provider, &config.embedding, cache);
        Ok(Self::new(Arc::new(embedder), &config.index, store_dir))
    }

    pub fn embedder(&self) -> &EmbeddingEngine {
        &self.embedder
    }

    pub fn is_built(&self) -> bool {
        self.built.load(Ordering::Acquire)
    }

    fn ensure_built(&self) -> AppResult<()> {
        if self.is_built() {
            Ok(())
        } else {
            Err(AppError::IndexNotBuilt)
        }
    }

    fn partition(&self, partition: Partition) -> &RwLock<FlatIndex> {
        &self.partitions[slot(partition)]
    }

    fn store(&self, partition: Partition) -> AppResult<Option<PartitionStore>> {
        self.store_dir
            .as_ref()
            .map(|dir| {
                PartitionStore::open(
                    dir.join(format!("{}.sqlite", partition.as_str().to_ascii_lowercase())),
                )
            })
            .transpose()
    }

    fn docs_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Document>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn docs_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Document>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn excluded_read(&self) -> std::sync::RwLockReadGuard<'_, HashSet<String>> {
        self.excluded.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn excluded_write(&self) -> std::sync::RwLockWriteGuard<'_, HashSet<String>> {
        self.excluded.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build every partition from `documents`.
    ///
    /// Partitions are prepared concurrently and swapped in only after all
    /// of them succeeded, so a provider failure leaves the previous state.
    pub async fn build(&self, documents: Vec<Document>) -> AppResult<()> {
        let mut seen = HashSet::new();
        let mut groups: BTreeMap<Partition, Vec<Document>> =
            Partition::ALL.iter().map(|p| (*p, Vec::new())).collect();

        for doc in documents {
            doc.validate()?;
            if !seen.insert(doc.id.clone()) {
                return Err(AppError::Other(format!("Duplicate document id '{}'", doc.id)));
            }
            groups.entry(doc.partition).or_default().push(doc);
        }

        let prepared = try_join_all(
            groups
                .iter()
                .map(|(partition, docs)| self.prepare_partition(*partition, docs)),
        )
        .await?;

        for (partition, index) in groups.keys().zip(prepared) {
            *self.partition(*partition).write().await = index;
        }

        *self.docs_write() = groups
            .into_values()
            .flatten()
            .map(|d| (d.id.clone(), d))
            .collect();
        self.excluded_write().clear();
        self.built.store(true, Ordering::Release);

        tracing::info!("Index built: {} documents", self.docs_read().len());
        Ok(())
    }

    async fn prepare_partition(&self, partition: Partition, docs: &[Document]) -> AppResult<FlatIndex> {
        let dims = self.embedder.dimensions();
        if docs.is_empty() {
            tracing::info!("{} partition is empty", partition);
            return Ok(FlatIndex::new(dims));
        }

        let fingerprint = partition_fingerprint(docs, self.fingerprint_prefix_chars);
        let meta = StoreMeta {
            fingerprint,
            count: docs.len(),
            model: self.embedder.model_id().to_string(),
            dimensions: dims,
        };
        let store = self.store(partition)?;

        if let Some(store) = &store {
            match store.read_meta()? {
                Some(stored) if stored == meta => {
                    let entries = store.load_entries()?;
                    if entries.len() == docs.len() {
                        tracing::info!(
                            "{} partition loaded from store ({} vectors)",
                            partition,
                            entries.len()
                        );
                        return FlatIndex::from_entries(dims, entries);
                    }
                    tracing::warn!(
                        "{} store holds {} vectors but meta says {}, rebuilding",
                        partition,
                        entries.len(),
                        stored.count
                    );
                }
                Some(_) => {
                    tracing::info!("{} store is stale, rebuilding", partition);
                }
                None => {}
            }
        }

        let texts: Vec<String> = docs.iter().map(|d| d.search_text.clone()).collect();
        let embeddings = self.embedder.embed_texts(&texts).await?;

        let entries: Vec<(String, Vec<f32>)> = docs
            .iter()
            .map(|d| d.id.clone())
            .zip(embeddings)
            .collect();

        if let Some(store) = &store {
            store.replace_all(&meta, &entries)?;
        }

        tracing::info!("{} partition embedded: {} documents", partition, entries.len());
        FlatIndex::from_entries(dims, entries)
    }

    /// Embed a query through the query-embedding cache.
    pub async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        self.ensure_built()?;
        self.embedder.embed_query(text).await
    }

    /// Top `top_k` documents for `text` across `partitions` (all when
    /// empty), skipping `exclude_ids` and virtually removed ids.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        partitions: &[Partition],
        exclude_ids: &HashSet<String>,
    ) -> AppResult<Vec<RetrievalResult>> {
        let embedding = self.embed_query(text).await?;
        self.search(&embedding, top_k, partitions, exclude_ids).await
    }

    /// Same as [`Self::query`] for an already embedded query.
    pub async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        partitions: &[Partition],
        exclude_ids: &HashSet<String>,
    ) -> AppResult<Vec<RetrievalResult>> {
        self.ensure_built()?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let fetch = top_k + exclude_ids.len() + self.excluded_read().len();
        let mut candidates: Vec<Neighbor> = Vec::new();
        for partition in selected(partitions) {
            let index = self.partition(partition).read().await;
            candidates.extend(index.search(embedding, fetch)?);
        }

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let excluded = self.excluded_read();
        let docs = self.docs_read();
        let results: Vec<RetrievalResult> = candidates
            .into_iter()
            .filter(|n| !exclude_ids.contains(&n.doc_id) && !excluded.contains(&n.doc_id))
            .filter_map(|n| docs.get(&n.doc_id).map(|doc| (doc, n.distance)))
            .take(top_k)
            .enumerate()
            .map(|(i, (doc, distance))| RetrievalResult {
                doc_id: doc.id.clone(),
                partition: doc.partition,
                title: doc.title.clone(),
                body: truncate_chars(&doc.body, self.body_preview_chars),
                score: (1.0 - distance).clamp(0.0, 1.0),
                metadata: doc.metadata.clone(),
                provenance: doc.provenance.clone(),
                rank: i + 1,
            })
            .collect();

        tracing::debug!(
            "Retrieved {} results (requested top-{})",
            results.len(),
            top_k
        );
        Ok(results)
    }

    /// Top `k_per` results from each partition independently.
    pub async fn query_by_partitions(
        &self,
        text: &str,
        k_per: usize,
    ) -> AppResult<BTreeMap<Partition, Vec<RetrievalResult>>> {
        let embedding = self.embed_query(text).await?;
        let none = HashSet::new();

        let mut results = BTreeMap::new();
        for partition in Partition::ALL {
            let hits = self.search(&embedding, k_per, &[partition], &none).await?;
            results.insert(partition, hits);
        }
        Ok(results)
    }

    /// Single best match for `text`, or `None` when nothing is indexed.
    pub async fn similarity_to_corpus(
        &self,
        text: &str,
        partitions: &[Partition],
    ) -> AppResult<Option<CorpusMatch>> {
        let hits = self.query(text, 1, partitions, &HashSet::new()).await?;
        Ok(hits.into_iter().next().map(|r| CorpusMatch {
            doc_id: r.doc_id,
            similarity: r.score,
        }))
    }

    /// Virtually remove documents. Returns how many ids became excluded.
    ///
    /// Unknown ids are ignored.
    pub fn remove(&self, doc_ids: &[String]) -> usize {
        let mut excluded = self.excluded_write();
        let docs = self.docs_read();

        let mut removed = 0;
        for id in doc_ids {
            if !docs.contains_key(id) {
                tracing::debug!("Ignoring remove of unknown document '{}'", id);
                continue;
            }
            if excluded.insert(id.clone()) {
                removed += 1;
            }
        }

        tracing::info!("Excluded {} documents ({} total)", removed, excluded.len());
        removed
    }

    /// Clear ids from the exclusion set without touching documents.
    pub(crate) fn unexclude(&self, doc_ids: &[String]) -> usize {
        let mut excluded = self.excluded_write();
        doc_ids.iter().filter(|id| excluded.remove(*id)).count()
    }

    /// Add documents.
    ///
    /// Excluded ids are restored from their stored vectors. Everything
    /// else is embedded and upserted. Embedding and the store write both
    /// happen before any in-memory change, so a provider or store failure
    /// leaves the index untouched.
    pub async fn add(&self, documents: Vec<Document>) -> AppResult<AddOutcome> {
        self.ensure_built()?;

        let mut incoming: Vec<Document> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            doc.validate()?;
            match positions.get(&doc.id) {
                Some(&i) => incoming[i] = doc,
                None => {
                    positions.insert(doc.id.clone(), incoming.len());
                    incoming.push(doc);
                }
            }
        }

        let (restore, embed): (Vec<Document>, Vec<Document>) = {
            let excluded = self.excluded_read();
            let docs = self.docs_read();
            incoming
                .into_iter()
                .partition(|d| excluded.contains(&d.id) && docs.contains_key(&d.id))
        };

        let texts: Vec<String> = embed.iter().map(|d| d.search_text.clone()).collect();
        let embeddings = self.embedder.embed_texts(&texts).await?;

        let mut by_partition: BTreeMap<Partition, Vec<(Document, Vec<f32>)>> = BTreeMap::new();
        for (doc, embedding) in embed.into_iter().zip(embeddings) {
            by_partition.entry(doc.partition).or_default().push((doc, embedding));
        }

        // Persist first: a store failure must leave memory untouched
        let mut staged = Vec::with_capacity(by_partition.len());
        for (partition, items) in by_partition {
            let index = self.partition(partition).write().await;
            if let Some(store) = self.store(partition)? {
                let meta = self.prospective_meta(partition, &index, &items);
                let entries: Vec<(String, Vec<f32>)> = items
                    .iter()
                    .map(|(doc, embedding)| (doc.id.clone(), embedding.clone()))
                    .collect();
                store.upsert_entries(&meta, &entries)?;
            }
            staged.push((index, items));
        }

        let mut outcome = AddOutcome::default();

        {
            let mut excluded = self.excluded_write();
            let mut docs = self.docs_write();
            for doc in restore {
                excluded.remove(&doc.id);
                outcome.restored.push(doc.id.clone());
                docs.insert(doc.id.clone(), doc);
            }
        }

        for (mut index, items) in staged {
            for (doc, embedding) in items {
                index.upsert(&doc.id, embedding)?;
                outcome.embedded.push(doc.id.clone());
                self.docs_write().insert(doc.id.clone(), doc);
            }
        }

        tracing::info!(
            "Added documents: {} restored, {} embedded",
            outcome.restored.len(),
            outcome.embedded.len()
        );
        Ok(outcome)
    }

    /// Store meta for `partition` as it will be once `items` are upserted.
    fn prospective_meta(
        &self,
        partition: Partition,
        index: &FlatIndex,
        items: &[(Document, Vec<f32>)],
    ) -> StoreMeta {
        let fingerprint = {
            let docs = self.docs_read();
            let mut view: BTreeMap<&str, &Document> = docs
                .values()
                .filter(|d| d.partition == partition)
                .map(|d| (d.id.as_str(), d))
                .collect();
            for (doc, _) in items {
                view.insert(doc.id.as_str(), doc);
            }
            partition_fingerprint(view.into_values(), self.fingerprint_prefix_chars)
        };
        let added = items
            .iter()
            .filter(|(doc, _)| index.vector(&doc.id).is_none())
            .count();

        StoreMeta {
            fingerprint,
            count: index.len() + added,
            model: self.embedder.model_id().to_string(),
            dimensions: index.dimensions(),
        }
    }

    /// Look up a live document. Excluded and unknown ids give `None`.
    pub fn get(&self, doc_id: &str) -> Option<Document> {
        if self.excluded_read().contains(doc_id) {
            return None;
        }
        self.docs_read().get(doc_id).cloned()
    }

    /// Live documents of one partition, ordered by id.
    pub fn documents(&self, partition: Partition) -> Vec<Document> {
        let excluded = self.excluded_read();
        let mut docs: Vec<Document> = self
            .docs_read()
            .values()
            .filter(|d| d.partition == partition && !excluded.contains(&d.id))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    /// Ids of every live document.
    pub fn document_ids(&self) -> BTreeSet<String> {
        let excluded = self.excluded_read();
        self.docs_read()
            .keys()
            .filter(|id| !excluded.contains(*id))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> IndexStats {
        let mut partitions = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            let stored_vectors = self.partition(partition).read().await.len();
            partitions.push(PartitionStats {
                partition,
                stored_vectors,
                live_documents: self.documents(partition).len(),
            });
        }

        IndexStats {
            built: self.is_built(),
            model: self.embedder.model_id().to_string(),
            dimensions: self.embedder.dimensions(),
            partitions,
            excluded: self.excluded_read().len(),
            cached_queries: self.embedder.cached_queries(),
        }
    }

    /// Persist the query-embedding cache.
    pub fn flush(&self) -> AppResult<()> {
        self.embedder.flush_cache()
    }

    /// Stored vector for `doc_id`, excluded or not.
    pub async fn stored_vector(&self, doc_id: &str) -> Option<Vec<f32>> {
        let partition = Partition::from_doc_id(doc_id)?;
        self.partition(partition)
            .read()
            .await
            .vector(doc_id)
            .map(<[f32]>::to_vec)
    }
}

/// Requested partitions in storage order, defaulting to all.
fn selected(partitions: &[Partition]) -> Vec<Partition> {
    if partitions.is_empty() {
        Partition::ALL.to_vec()
    } else {
        Partition::ALL
            .into_iter()
            .filter(|p| partitions.contains(p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> Document {
        Document::new(id, id, text, text).unwrap()
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = vec![doc("KB-1", "alpha"), doc("KB-2", "beta")];
        let b = vec![doc("KB-2", "beta"), doc("KB-1", "alpha")];
        assert_eq!(partition_fingerprint(&a, 256), partition_fingerprint(&b, 256));
    }

    #[test]
    fn test_fingerprint_only_sees_prefix() {
        let a = vec![doc("KB-1", "alpha beta")];
        let b = vec![doc("KB-1", "alpha gamma")];
        assert_eq!(partition_fingerprint(&a, 5), partition_fingerprint(&b, 5));
        assert_ne!(partition_fingerprint(&a, 256), partition_fingerprint(&b, 256));
    }

    #[test]
    fn test_selected_defaults_to_all() {
        assert_eq!(selected(&[]), Partition::ALL.to_vec());
        assert_eq!(
            selected(&[Partition::Ticket, Partition::Kb, Partition::Kb]),
            vec![Partition::Kb, Partition::Ticket]
        );
    }
}
