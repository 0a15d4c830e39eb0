//! Vector index abstraction for one partition.
//!
//! Vectors are unit length, so cosine distance is `1 - dot`.

use meridian_core::{AppError, AppResult};
use std::collections::HashMap;

/// A nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub doc_id: String,

    /// Cosine distance, `1 - similarity`
    pub distance: f32,
}

/// Trait for per-partition vector index backends.
///
/// Implementations must support:
/// - Upserting a document's embedding
/// - Searching for the nearest vectors (top-k)
/// - Reporting size and dimensions
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the embedding stored for `doc_id`.
    fn upsert(&mut self, doc_id: &str, embedding: Vec<f32>) -> AppResult<()>;

    /// Return up to `top_k` neighbors ordered by ascending distance.
    fn search(&self, query_embedding: &[f32], top_k: usize) -> AppResult<Vec<Neighbor>>;

    /// Stored embedding for `doc_id`, if any.
    fn vector(&self, doc_id: &str) -> Option<&[f32]>;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;
}

/// Exact brute-force index over an in-memory vector list.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dimensions: usize,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<String, usize>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    /// Build from parallel id/vector lists, as loaded from a store.
    pub fn from_entries(dimensions: usize, entries: Vec<(String, Vec<f32>)>) -> AppResult<Self> {
        let mut index = Self::new(dimensions);
        for (doc_id, embedding) in entries {
            index.upsert(&doc_id, embedding)?;
        }
        Ok(index)
    }

    /// Stored entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.vectors.iter().map(Vec::as_slice))
    }
}

impl VectorIndex for FlatIndex {
    fn upsert(&mut self, doc_id: &str, embedding: Vec<f32>) -> AppResult<()> {
        if embedding.len() != self.dimensions {
            return Err(AppError::Index(format!(
                "Embedding for '{}' has dimension {}, index expects {}",
                doc_id,
                embedding.len(),
                self.dimensions
            )));
        }

        match self.positions.get(doc_id) {
            Some(&pos) => self.vectors[pos] = embedding,
            None => {
                self.positions.insert(doc_id.to_string(), self.ids.len());
                self.ids.push(doc_id.to_string());
                self.vectors.push(embedding);
            }
        }
        Ok(())
    }

    fn search(&self, query_embedding: &[f32], top_k: usize) -> AppResult<Vec<Neighbor>> {
        if top_k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        if query_embedding.len() != self.dimensions {
            return Err(AppError::Index(format!(
                "Query has dimension {}, index expects {}",
                query_embedding.len(),
                self.dimensions
            )));
        }

        let mut neighbors: Vec<Neighbor> = self
            .entries()
            .map(|(doc_id, vector)| Neighbor {
                doc_id: doc_id.to_string(),
                distance: 1.0 - dot(query_embedding, vector),
            })
            .collect();

        // Stable: equal distances keep insertion order
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(top_k);
        Ok(neighbors)
    }

    fn vector(&self, doc_id: &str) -> Option<&[f32]> {
        self.positions
            .get(doc_id)
            .map(|&pos| self.vectors[pos].as_slice())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FlatIndex {
        FlatIndex::from_entries(
            2,
            vec![
                ("KB-1".to_string(), vec![1.0, 0.0]),
                ("KB-2".to_string(), vec![0.0, 1.0]),
                ("KB-3".to_string(), vec![0.6, 0.8]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_search_orders_by_distance() {
        let hits = index().search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|n| n.doc_id.as_str()).collect();

        assert_eq!(ids, vec!["KB-1", "KB-3", "KB-2"]);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[1].distance - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_search_truncates() {
        assert_eq!(index().search(&[1.0, 0.0], 1).unwrap().len(), 1);
        assert!(index().search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut index = index();
        index.upsert("KB-2", vec![1.0, 0.0]).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.vector("KB-2"), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let mut index = index();
        assert!(index.upsert("KB-4", vec![1.0]).is_err());
        assert!(index.search(&[1.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_empty_index_search() {
        let index = FlatIndex::new(2);
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
    }
}
