//! Approve command handler.
//!
//! Adds reviewed KB articles to the index and merges them into the corpus
//! file, so every later session builds with them.

use crate::session::{load_documents, print_json, Session};
use clap::Args;
use meridian_core::{config::AppConfig, AppError, AppResult};
use meridian_engine::Document;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Add approved documents to the index
#[derive(Args, Debug)]
pub struct ApproveCommand {
    /// JSON file with one document or an array of documents
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ApproveCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing approve command");

        let approved = load_documents(&self.file)?;
        for doc in &approved {
            doc.validate()?;
        }

        let session = Session::open(config).await?;
        let outcome = session.index.add(approved.clone()).await?;
        session.close()?;

        save_to_corpus(config.documents_path()?, approved)?;

        if self.json {
            return print_json(&outcome);
        }

        println!(
            "Approved {} documents ({} embedded, {} restored)",
            outcome.embedded.len() + outcome.restored.len(),
            outcome.embedded.len(),
            outcome.restored.len()
        );
        println!("Saved to {:?}", config.documents_path()?);

        Ok(())
    }
}

/// Merge `approved` into the corpus file, replacing documents with the same id.
fn save_to_corpus(path: &Path, approved: Vec<Document>) -> AppResult<()> {
    let replaced: HashSet<&str> = approved.iter().map(|d| d.id.as_str()).collect();
    let mut corpus: Vec<Document> = load_documents(path)?
        .into_iter()
        .filter(|d| !replaced.contains(d.id.as_str()))
        .collect();
    let added = approved.len();
    corpus.extend(approved);

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(&corpus)?)
        .map_err(|e| AppError::Config(format!("Failed to write corpus {:?}: {}", tmp, e)))?;
    std::fs::rename(&tmp, path)?;

    tracing::info!("Saved {} approved documents to {:?}", added, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_engine::Partition;
    use tempfile::TempDir;

    #[test]
    fn test_save_replaces_and_appends() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("docs.json");
        std::fs::write(
            &path,
            r#"[{"id":"KB-1","partition":"KB","title":"old","body":"b","search_text":"s"},
                {"id":"SCRIPT-1","partition":"SCRIPT","title":"t","body":"b","search_text":"s"}]"#,
        )
        .unwrap();

        let approved = vec![
            Document::new("KB-1", "new", "b", "s").unwrap(),
            Document::new("KB-2", "added", "b", "s").unwrap(),
        ];
        save_to_corpus(&path, approved).unwrap();

        let saved = load_documents(&path).unwrap();
        let ids: Vec<&str> = saved.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["SCRIPT-1", "KB-1", "KB-2"]);
        assert_eq!(saved[1].title, "new");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_approved_documents_survive_next_session() {
        let temp = TempDir::new().unwrap();
        let corpus = temp.path().join("docs.json");
        std::fs::write(
            &corpus,
            r#"[{"id":"KB-1","partition":"KB","title":"Reset voucher","body":"b","search_text":"reset a stuck voucher"},
                {"id":"KB-2","partition":"KB","title":"Edit screen","body":"b","search_text":"edit the leasing screen"}]"#,
        )
        .unwrap();
        let file = temp.path().join("approved.json");
        std::fs::write(
            &file,
            r#"{"id":"KB-3","partition":"KB","title":"Sync fix","body":"b","search_text":"fix accounting sync"}"#,
        )
        .unwrap();

        let config = AppConfig {
            workspace: temp.path().to_path_buf(),
            documents: Some(corpus),
            ..AppConfig::default()
        };
        ApproveCommand { file, json: true }
            .execute(&config)
            .await
            .unwrap();

        let session = Session::open(&config).await.unwrap();
        assert!(session.index.get("KB-3").is_some());
        assert_eq!(session.index.documents(Partition::Kb).len(), 3);
    }
}
