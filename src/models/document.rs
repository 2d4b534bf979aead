//! Documents, their processing status, and the chunks derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source tag recorded in every chunk's metadata.
pub const CHUNK_SOURCE_TAG: &str = "ingest-queue";

/// Processing status of a document.
///
/// `Pending -> Processing -> Completed`, or `Pending/Processing -> Failed`.
/// `Processing -> Processing` is allowed so a redelivered task can resume
/// after a crashed attempt. Terminal states never change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Pending, Failed)
                | (Processing, Failed)
        )
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(DocumentStatus::Pending),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "COMPLETED" => Ok(DocumentStatus::Completed),
            "FAILED" => Ok(DocumentStatus::Failed),
            _ => Err(format!("unknown document status: {}", s)),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

/// One uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub storage_key: String,
    pub file_size: i64,
    pub content_type: Option<String>,
    pub content_hash: String,
    pub permission_group: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Move to `next`, clearing any previous error unless the move is to `Failed`.
    pub fn transition(&mut self, next: DocumentStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next != DocumentStatus::Failed {
            self.error_message = None;
        }
        Ok(())
    }

    /// Mark failed with an already-truncated diagnostic.
    pub fn fail(&mut self, message: String) -> Result<(), InvalidTransition> {
        self.transition(DocumentStatus::Failed)?;
        self.error_message = Some(message);
        Ok(())
    }
}

/// Registration data for a new document; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub storage_key: String,
    pub file_size: i64,
    pub content_type: Option<String>,
    pub content_hash: String,
    pub permission_group: String,
}

/// Provenance stored alongside each chunk as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub filename: String,
    pub document_id: i64,
    pub chunk_index: u32,
}

impl ChunkMetadata {
    pub fn new(document: &Document, chunk_index: u32) -> Self {
        Self {
            source: CHUNK_SOURCE_TAG.to_string(),
            filename: document.filename.clone(),
            document_id: document.id,
            chunk_index,
        }
    }
}

/// A chunk ready to be written inside a replacement transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunk {
    pub document_id: i64,
    pub chunk_index: u32,
    pub content: String,
    pub metadata: ChunkMetadata,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// A chunk returned by nearest-neighbor search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub document_id: i64,
    pub chunk_index: u32,
    pub content: String,
    /// L2 distance to the query vector; smaller is closer.
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(status: DocumentStatus) -> Document {
        Document {
            id: 7,
            filename: "handbook.md".to_string(),
            storage_key: "kb-docs/hr/abc_handbook.md".to_string(),
            file_size: 42,
            content_type: Some("text/markdown".to_string()),
            content_hash: "abc".to_string(),
            permission_group: "hr".to_string(),
            status,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!(
            "processing".parse::<DocumentStatus>().unwrap(),
            DocumentStatus::Processing
        );
        assert_eq!(DocumentStatus::Completed.to_string(), "COMPLETED");
        assert!("DONE".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_uppercase() {
        let json = serde_json::to_string(&DocumentStatus::Failed).unwrap();
        assert_eq!(json, "\"FAILED\"");
    }

    #[test]
    fn test_allowed_transitions() {
        use DocumentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        for next in [Pending, Processing, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_fail_records_message() {
        let mut doc = document(DocumentStatus::Processing);
        doc.fail("corrupt".to_string()).unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.error_message.as_deref(), Some("corrupt"));
    }

    #[test]
    fn test_terminal_document_rejects_transition() {
        let mut doc = document(DocumentStatus::Completed);
        let err = doc.transition(DocumentStatus::Processing).unwrap_err();
        assert_eq!(err.from, DocumentStatus::Completed);
        assert_eq!(doc.status, DocumentStatus::Completed);
    }

    #[test]
    fn test_chunk_metadata_json_shape() {
        let doc = document(DocumentStatus::Processing);
        let metadata = ChunkMetadata::new(&doc, 3);
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["source"], CHUNK_SOURCE_TAG);
        assert_eq!(value["filename"], "handbook.md");
        assert_eq!(value["document_id"], 7);
        assert_eq!(value["chunk_index"], 3);
    }
}
