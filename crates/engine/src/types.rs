//! Engine type definitions.

use meridian_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One of the three independently indexed document categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Partition {
    /// Procedural knowledge article
    Kb,
    /// Operational (backend) script
    Script,
    /// Resolved support ticket
    #[serde(alias = "TICKET_RESOLUTION")]
    Ticket,
}

impl Partition {
    /// All partitions in storage order.
    pub const ALL: [Partition; 3] = [Partition::Kb, Partition::Script, Partition::Ticket];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Kb => "KB",
            Partition::Script => "SCRIPT",
            Partition::Ticket => "TICKET",
        }
    }

    /// Resolve the partition encoded in a document id prefix.
    pub fn from_doc_id(doc_id: &str) -> Option<Self> {
        if doc_id.starts_with("KB-") {
            Some(Partition::Kb)
        } else if doc_id.starts_with("SCRIPT-") {
            Some(Partition::Script)
        } else if doc_id.starts_with("CS-") || doc_id.starts_with("TICKET-") {
            Some(Partition::Ticket)
        } else {
            None
        }
    }

    /// The two partitions other than `self`, in storage order.
    pub fn others(&self) -> Vec<Partition> {
        Partition::ALL
            .into_iter()
            .filter(|p| p != self)
            .collect()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KB" => Ok(Partition::Kb),
            "SCRIPT" => Ok(Partition::Script),
            "TICKET" | "TICKET_RESOLUTION" => Ok(Partition::Ticket),
            other => Err(AppError::Other(format!(
                "Unknown partition '{}'. Expected one of: KB, SCRIPT, TICKET",
                other
            ))),
        }
    }
}

/// An immutable support document.
///
/// `search_text` feeds the embedding only. `body` is kept verbatim and only
/// shortened when it is copied into a [`RetrievalResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Globally unique id; its prefix encodes the partition
    pub id: String,

    /// Partition this document is indexed in
    pub partition: Partition,

    pub title: String,

    pub body: String,

    /// Title/category/module/tags/body concatenation used for embedding
    pub search_text: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Opaque lineage records, in order
    #[serde(default)]
    pub provenance: Vec<serde_json::Value>,
}

impl Document {
    /// Create a document, deriving the partition from the id prefix.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        search_text: impl Into<String>,
    ) -> AppResult<Self> {
        let id = id.into();
        let partition = Partition::from_doc_id(&id).ok_or_else(|| {
            AppError::Other(format!("Document id '{}' has no known partition prefix", id))
        })?;

        Ok(Self {
            id,
            partition,
            title: title.into(),
            body: body.into(),
            search_text: search_text.into(),
            metadata: BTreeMap::new(),
            provenance: Vec::new(),
        })
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Check that the id prefix agrees with the declared partition.
    pub fn validate(&self) -> AppResult<()> {
        match Partition::from_doc_id(&self.id) {
            Some(p) if p == self.partition => Ok(()),
            Some(p) => Err(AppError::Other(format!(
                "Document '{}' declares partition {} but its id prefix encodes {}",
                self.id, self.partition, p
            ))),
            None => Err(AppError::Other(format!(
                "Document id '{}' has no known partition prefix",
                self.id
            ))),
        }
    }
}

/// A single ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub doc_id: String,
    pub partition: Partition,
    pub title: String,

    /// Body truncated to the configured preview length
    pub body: String,

    /// Cosine similarity in [0, 1]
    pub score: f32,

    pub metadata: BTreeMap<String, String>,
    pub provenance: Vec<serde_json::Value>,

    /// 1-indexed position in the result list
    pub rank: usize,
}

/// Best match of a text against the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusMatch {
    pub doc_id: String,
    pub similarity: f32,
}

/// A resolved ticket as consumed by gap detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub ticket_id: String,
    pub subject: String,
    pub description: String,
    pub resolution: String,
    pub tier: u8,
    pub module: String,
    pub category: String,
    pub script_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl TicketRecord {
    /// Build a ticket record from a TICKET document.
    ///
    /// Subject comes from the title and resolution from the body; the rest
    /// is read from metadata (`description`, `tier`, `module`, `category`,
    /// `script_id`, `conversation_id`).
    pub fn from_document(doc: &Document) -> AppResult<Self> {
        if doc.partition != Partition::Ticket {
            return Err(AppError::Other(format!(
                "Document '{}' is a {} document, not a ticket",
                doc.id, doc.partition
            )));
        }

        let field = |key: &str| doc.metadata_value(key).unwrap_or_default().to_string();
        let optional = |key: &str| {
            doc.metadata_value(key)
                .map(str::trim)
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
                .map(str::to_string)
        };

        Ok(Self {
            ticket_id: doc.id.clone(),
            subject: doc.title.clone(),
            description: field("description"),
            resolution: doc.body.clone(),
            tier: parse_tier(doc.metadata_value("tier").unwrap_or_default()),
            module: field("module"),
            category: field("category"),
            script_id: optional("script_id"),
            conversation_id: optional("conversation_id"),
        })
    }

    /// Text describing the problem: subject followed by description.
    pub fn problem_text(&self) -> String {
        format!("{} {}", self.subject, self.description)
    }
}

/// Tiers arrive as "3" or "3.0" depending on the source sheet.
fn parse_tier(raw: &str) -> u8 {
    let raw = raw.trim();
    raw.parse::<u8>()
        .ok()
        .or_else(|| raw.parse::<f32>().ok().map(|t| t as u8))
        .unwrap_or(0)
}

/// Coverage of one ticket by the KB partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapDetectionResult {
    pub ticket_id: String,
    pub is_gap: bool,

    /// Best KB similarity of the resolution text
    pub resolution_similarity: f32,
    pub best_matching_kb_id: String,

    /// Best KB similarity of subject + description
    pub problem_similarity: f32,
    pub best_matching_kb_for_problem: String,

    pub resolution_text: String,
    pub description_text: String,
    pub tier: u8,
    pub module: String,
    pub category: String,
    pub script_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// A cluster of gap tickets sharing one (category, module) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergingIssue {
    pub category: String,
    pub module: String,
    pub ticket_count: usize,
    pub ticket_ids: Vec<String>,
    pub avg_similarity: f32,

    /// Resolution excerpt of the first ticket seen in the cluster
    pub sample_resolution: String,
}

/// Take the first `max_chars` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_from_prefix() {
        assert_eq!(Partition::from_doc_id("KB-001"), Some(Partition::Kb));
        assert_eq!(Partition::from_doc_id("SCRIPT-9"), Some(Partition::Script));
        assert_eq!(Partition::from_doc_id("CS-38908386"), Some(Partition::Ticket));
        assert_eq!(Partition::from_doc_id("XYZ-1"), None);
    }

    #[test]
    fn test_partition_serde_names() {
        let json = serde_json::to_string(&Partition::Kb).unwrap();
        assert_eq!(json, "\"KB\"");
        let parsed: Partition = serde_json::from_str("\"SCRIPT\"").unwrap();
        assert_eq!(parsed, Partition::Script);
        assert_eq!("ticket".parse::<Partition>().unwrap(), Partition::Ticket);
    }

    #[test]
    fn test_document_new_rejects_unknown_prefix() {
        assert!(Document::new("DOC-1", "t", "b", "s").is_err());
        let doc = Document::new("KB-1", "t", "b", "s").unwrap();
        assert_eq!(doc.partition, Partition::Kb);
    }

    #[test]
    fn test_validate_partition_mismatch() {
        let mut doc = Document::new("KB-1", "t", "b", "s").unwrap();
        doc.partition = Partition::Script;
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_ticket_record_from_document() {
        let doc = Document::new("CS-1", "Cannot advance date", "Ran backend fix", "s")
            .unwrap()
            .with_metadata("description", "Date stuck")
            .with_metadata("tier", "3.0")
            .with_metadata("module", "Accounting")
            .with_metadata("category", "Data")
            .with_metadata("script_id", "nan");

        let ticket = TicketRecord::from_document(&doc).unwrap();
        assert_eq!(ticket.tier, 3);
        assert_eq!(ticket.resolution, "Ran backend fix");
        assert_eq!(ticket.problem_text(), "Cannot advance date Date stuck");
        assert_eq!(ticket.script_id, None);
    }

    #[test]
    fn test_truncate_chars_is_utf8_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
