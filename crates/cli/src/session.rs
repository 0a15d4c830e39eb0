//! Shared setup for commands: load the corpus and build the index.

use meridian_core::{config::AppConfig, AppError, AppResult};
use meridian_engine::{
    load_config, Document, EngineConfig, GapDetector, KeywordRouter, Partition, PartitionedIndex,
    QueryRouter, SelfLearningEvaluator, TicketRecord,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// A built index plus the configuration it was built with.
pub struct Session {
    pub engine: EngineConfig,
    pub index: Arc<PartitionedIndex>,
}

impl Session {
    /// Load engine config and documents, then build the index.
    pub async fn open(config: &AppConfig) -> AppResult<Self> {
        let engine = load_config(&config.config_path())?;
        let documents = load_documents(config.documents_path()?)?;

        let index = Arc::new(PartitionedIndex::from_config(&engine, &config.cache_dir())?);
        index.build(documents).await?;

        Ok(Self { engine, index })
    }

    pub fn router(&self) -> Arc<dyn QueryRouter> {
        Arc::new(KeywordRouter::new(self.index.clone(), &self.engine.retrieval))
    }

    pub fn detector(&self) -> AppResult<GapDetector> {
        let tickets = self
            .index
            .documents(Partition::Ticket)
            .iter()
            .map(TicketRecord::from_document)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(GapDetector::new(
            self.index.clone(),
            tickets,
            self.engine.gaps.threshold,
        ))
    }

    pub fn evaluator(&self) -> AppResult<SelfLearningEvaluator> {
        Ok(SelfLearningEvaluator::new(
            self.index.clone(),
            self.detector()?,
            self.router(),
            self.engine.gaps.learned_source_type.clone(),
        ))
    }

    /// Persist the query cache before exiting.
    pub fn close(&self) -> AppResult<()> {
        self.index.flush()
    }
}

/// One document or an array of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentInput {
    Many(Vec<Document>),
    One(Box<Document>),
}

/// Read documents from a JSON file holding an array or a single object.
pub fn load_documents(path: &Path) -> AppResult<Vec<Document>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("Failed to read documents {:?}: {}", path, e)))?;

    let documents = match serde_json::from_str::<DocumentInput>(&contents)
        .map_err(|e| AppError::Serialization(format!("Invalid documents in {:?}: {}", path, e)))?
    {
        DocumentInput::Many(docs) => docs,
        DocumentInput::One(doc) => vec![*doc],
    };

    tracing::info!("Loaded {} documents from {:?}", documents.len(), path);
    Ok(documents)
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_array_and_single() {
        let temp = TempDir::new().unwrap();
        let many = temp.path().join("docs.json");
        std::fs::write(
            &many,
            r#"[{"id":"KB-1","partition":"KB","title":"t","body":"b","search_text":"s"},
                {"id":"CS-1","partition":"TICKET","title":"t","body":"b","search_text":"s","metadata":{"tier":"2"}}]"#,
        )
        .unwrap();
        assert_eq!(load_documents(&many).unwrap().len(), 2);

        let one = temp.path().join("doc.json");
        std::fs::write(
            &one,
            r#"{"id":"KB-9","partition":"KB","title":"t","body":"b","search_text":"s"}"#,
        )
        .unwrap();
        assert_eq!(load_documents(&one).unwrap()[0].id, "KB-9");
    }

    #[test]
    fn test_load_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("docs.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_documents(&path),
            Err(AppError::Serialization(_))
        ));
    }
}
