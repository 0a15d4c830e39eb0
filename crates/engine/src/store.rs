//! SQLite-backed persistence for one partition's vectors.
//!
//! Each partition owns a database with a `meta` table (fingerprint,
//! document count, model id, dimensions) and a `vectors` table. Rows are
//! only ever written inside a transaction, so a store is either the
//! previous snapshot or the complete new one.

use meridian_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

/// Snapshot description recorded alongside the vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMeta {
    pub fingerprint: String,
    pub count: usize,
    pub model: String,
    pub dimensions: usize,
}

/// Handle to one partition database.
///
/// Connections are opened per operation so the handle stays `Send + Sync`.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    path: PathBuf,
}

impl PartitionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let store = Self { path: path.into() };
        store.connect()?;
        Ok(store)
    }

    fn connect(&self) -> AppResult<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Index(format!("Failed to create store directory: {}", e))
            })?;
        }

        let conn = Connection::open(&self.path)
            .map_err(|e| AppError::Index(format!("Failed to open partition store: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS vectors (
                doc_id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                embedding BLOB NOT NULL
            );
            "#,
        )
        .map_err(|e| AppError::Index(format!("Failed to create tables: {}", e)))?;

        Ok(conn)
    }

    /// Read the recorded snapshot description, if a complete one exists.
    pub fn read_meta(&self) -> AppResult<Option<StoreMeta>> {
        let conn = self.connect()?;

        let get = |key: &str| -> AppResult<Option<String>> {
            conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|e| AppError::Index(format!("Failed to read meta '{}': {}", key, e)))
        };

        let (Some(fingerprint), Some(count), Some(model), Some(dimensions)) =
            (get("fingerprint")?, get("count")?, get("model")?, get("dimensions")?)
        else {
            return Ok(None);
        };

        let (Ok(count), Ok(dimensions)) = (count.parse::<usize>(), dimensions.parse::<usize>()) else {
            tracing::warn!("Ignoring malformed meta in {:?}", self.path);
            return Ok(None);
        };

        Ok(Some(StoreMeta {
            fingerprint,
            count,
            model,
            dimensions,
        }))
    }

    /// Load every stored vector in insertion order.
    pub fn load_entries(&self) -> AppResult<Vec<(String, Vec<f32>)>> {
        let conn = self.connect()?;

        let mut stmt = conn
            .prepare("SELECT doc_id, embedding FROM vectors ORDER BY position")
            .map_err(|e| AppError::Index(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| AppError::Index(format!("Failed to query vectors: {}", e)))?;

        let mut entries = Vec::new();
        for row in rows {
            let (doc_id, bytes) =
                row.map_err(|e| AppError::Index(format!("Failed to read vector row: {}", e)))?;
            entries.push((doc_id, bytes_to_embedding(&bytes)?));
        }

        tracing::debug!("Loaded {} vectors from {:?}", entries.len(), self.path);
        Ok(entries)
    }

    /// Replace the whole snapshot in one transaction.
    pub fn replace_all(&self, meta: &StoreMeta, entries: &[(String, Vec<f32>)]) -> AppResult<()> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Index(format!("Failed to begin transaction: {}", e)))?;

        tx.execute("DELETE FROM vectors", [])
            .map_err(|e| AppError::Index(format!("Failed to clear vectors: {}", e)))?;

        for (position, (doc_id, embedding)) in entries.iter().enumerate() {
            tx.execute(
                "INSERT INTO vectors (doc_id, position, embedding) VALUES (?1, ?2, ?3)",
                params![doc_id, position as i64, embedding_to_bytes(embedding)],
            )
            .map_err(|e| AppError::Index(format!("Failed to insert vector: {}", e)))?;
        }

        write_meta(&tx, meta)?;

        tx.commit()
            .map_err(|e| AppError::Index(format!("Failed to commit snapshot: {}", e)))?;

        tracing::debug!("Wrote {} vectors to {:?}", entries.len(), self.path);
        Ok(())
    }

    /// Insert or replace some vectors and refresh the meta, in one transaction.
    pub fn upsert_entries(&self, meta: &StoreMeta, entries: &[(String, Vec<f32>)]) -> AppResult<()> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Index(format!("Failed to begin transaction: {}", e)))?;

        for (doc_id, embedding) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO vectors (doc_id, position, embedding) VALUES (
                    ?1,
                    COALESCE(
                        (SELECT position FROM vectors WHERE doc_id = ?1),
                        (SELECT COALESCE(MAX(position), -1) + 1 FROM vectors)
                    ),
                    ?2
                )",
                params![doc_id, embedding_to_bytes(embedding)],
            )
            .map_err(|e| AppError::Index(format!("Failed to upsert vector: {}", e)))?;
        }

        write_meta(&tx, meta)?;

        tx.commit()
            .map_err(|e| AppError::Index(format!("Failed to commit vectors: {}", e)))?;
        Ok(())
    }
}

fn write_meta(conn: &Connection, meta: &StoreMeta) -> AppResult<()> {
    let pairs = [
        ("fingerprint", meta.fingerprint.clone()),
        ("count", meta.count.to_string()),
        ("model", meta.model.clone()),
        ("dimensions", meta.dimensions.to_string()),
    ];

    for (key, value) in pairs {
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| AppError::Index(format!("Failed to write meta '{}': {}", key, e)))?;
    }
    Ok(())
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Index(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(count: usize) -> StoreMeta {
        StoreMeta {
            fingerprint: "abc".to_string(),
            count,
            model: "trigram:trigram-v1@2".to_string(),
            dimensions: 2,
        }
    }

    #[test]
    fn test_empty_store_has_no_meta() {
        let temp = TempDir::new().unwrap();
        let store = PartitionStore::open(temp.path().join("kb.sqlite")).unwrap();

        assert_eq!(store.read_meta().unwrap(), None);
        assert!(store.load_entries().unwrap().is_empty());
    }

    #[test]
    fn test_replace_all_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = PartitionStore::open(temp.path().join("kb.sqlite")).unwrap();
        let entries = vec![
            ("KB-2".to_string(), vec![0.0, 1.0]),
            ("KB-1".to_string(), vec![0.6, 0.8]),
        ];

        store.replace_all(&meta(2), &entries).unwrap();

        assert_eq!(store.read_meta().unwrap(), Some(meta(2)));
        assert_eq!(store.load_entries().unwrap(), entries);

        store.replace_all(&meta(1), &entries[..1]).unwrap();
        assert_eq!(store.load_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_appends_and_replaces() {
        let temp = TempDir::new().unwrap();
        let store = PartitionStore::open(temp.path().join("kb.sqlite")).unwrap();
        store
            .replace_all(&meta(1), &[("KB-1".to_string(), vec![1.0, 0.0])])
            .unwrap();

        store
            .upsert_entries(
                &meta(2),
                &[
                    ("KB-1".to_string(), vec![0.0, 1.0]),
                    ("KB-9".to_string(), vec![1.0, 0.0]),
                ],
            )
            .unwrap();

        let entries = store.load_entries().unwrap();
        assert_eq!(
            entries,
            vec![
                ("KB-1".to_string(), vec![0.0, 1.0]),
                ("KB-9".to_string(), vec![1.0, 0.0]),
            ]
        );
        assert_eq!(store.read_meta().unwrap().unwrap().count, 2);
    }

    #[test]
    fn test_bytes_conversion_rejects_bad_length() {
        assert!(bytes_to_embedding(&[0u8; 3]).is_err());
        assert_eq!(
            bytes_to_embedding(&embedding_to_bytes(&[0.25, -1.5])).unwrap(),
            vec![0.25, -1.5]
        );
    }
}
