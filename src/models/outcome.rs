//! Results returned to callers of the chat and document services.

use serde::{Deserialize, Serialize};

use super::document::Document;

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Fixed reply when retrieval finds nothing the caller may see.
pub const NO_RELEVANT_CONTENT: &str = "No relevant content was found for this question.";

/// Fixed reply when the caller has no roles.
pub const UNAUTHORIZED: &str = "Not signed in or no permission to ask questions.";

/// Outcome of one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChatAnswer {
    Answered { answer: String, cached: bool },
    NoRelevantContent,
    Unauthorized,
}

impl ChatAnswer {
    /// Text shown to the user for this outcome.
    pub fn text(&self) -> &str {
        match self {
            ChatAnswer::Answered { answer, .. } => answer,
            ChatAnswer::NoRelevantContent => NO_RELEVANT_CONTENT,
            ChatAnswer::Unauthorized => UNAUTHORIZED,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ChatAnswer::Answered { cached: true, .. })
    }
}

/// Outcome of an upload registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Stored, registered as `PENDING`, and one ingestion task enqueued.
    Accepted { document: Document },
    /// Same content already registered in this permission group.
    Duplicate {
        permission_group: String,
        content_hash: String,
    },
    /// Caller has no user id or no roles.
    Unauthorized,
    /// Requested group is not one of the caller's roles.
    Forbidden { permission_group: String },
    /// Zero-byte upload.
    Empty,
}

/// Outcome of a delete, requeue or show request for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Done { document: Document },
    NotFound { document_id: i64 },
    /// Caller has no user id or no roles.
    Unauthorized,
    /// Document is outside the caller's roles.
    Forbidden { document_id: i64 },
    /// Document is not in a state that allows the request.
    Refused { document: Document, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_chat_answer_text() {
        let answered = ChatAnswer::Answered {
            answer: "42".to_string(),
            cached: true,
        };
        assert_eq!(answered.text(), "42");
        assert!(answered.is_cached());
        assert_eq!(ChatAnswer::NoRelevantContent.text(), NO_RELEVANT_CONTENT);
        assert!(!ChatAnswer::Unauthorized.is_cached());
    }

    #[test]
    fn test_chat_answer_json_is_tagged() {
        let value = serde_json::to_value(ChatAnswer::NoRelevantContent).unwrap();
        assert_eq!(value["outcome"], "no_relevant_content");
    }
}
