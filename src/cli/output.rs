use std::fmt::Write as FmtWrite;

use serde::Serialize;

use crate::models::{ChatAnswer, Document, DocumentOutcome, DocumentStatus, OutputFormat, UploadOutcome};
use crate::pipeline::WorkerStats;
use crate::services::QueueDepth;

pub trait Formatter {
    fn format_answer(&self, answer: &ChatAnswer) -> String;
    fn format_upload(&self, outcome: &UploadOutcome) -> String;
    fn format_documents(&self, documents: &[Document]) -> String;
    fn format_document_outcome(&self, action: &str, outcome: &DocumentOutcome) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_worker_stats(&self, stats: &WorkerStats) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub database_connected: bool,
    pub redis_url: String,
    pub redis_connected: bool,
    pub embedding_url: String,
    pub embedding_healthy: bool,
    pub ingest_queue: Option<QueueDepth>,
    pub dead_letter_queue: Option<QueueDepth>,
    pub documents: Vec<(DocumentStatus, i64)>,
}

pub struct TextFormatter;

impl TextFormatter {
    fn document_line(output: &mut String, document: &Document) {
        let _ = writeln!(
            output,
            "  #{:<6} {:<11} {:<12} {} ({} bytes)",
            document.id,
            document.status,
            document.permission_group,
            document.filename,
            document.file_size
        );
    }
}

fn connected(ok: bool) -> &'static str {
    if ok { "[CONNECTED]" } else { "[DISCONNECTED]" }
}

impl Formatter for TextFormatter {
    fn format_answer(&self, answer: &ChatAnswer) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "{}", answer.text());
        if answer.is_cached() {
            let _ = writeln!(output, "\n(cached)");
        }
        output
    }

    fn format_upload(&self, outcome: &UploadOutcome) -> String {
        match outcome {
            UploadOutcome::Accepted { document } => {
                let mut output = String::new();
                let _ = writeln!(output, "Upload accepted");
                let _ = writeln!(output, "---------------");
                let _ = writeln!(output, "Document:  #{}", document.id);
                let _ = writeln!(output, "File:      {}", document.filename);
                let _ = writeln!(output, "Group:     {}", document.permission_group);
                let _ = writeln!(output, "Hash:      {}", document.content_hash);
                let _ = writeln!(output, "Status:    {}", document.status);
                output
            }
            UploadOutcome::Duplicate {
                permission_group,
                content_hash,
            } => format!(
                "Duplicate: identical content ({content_hash}) already exists in group '{permission_group}'\n"
            ),
            UploadOutcome::Unauthorized => {
                "Not signed in or no roles: pass --user and --roles\n".to_string()
            }
            UploadOutcome::Forbidden { permission_group } => {
                format!("Forbidden: '{permission_group}' is not one of your roles\n")
            }
            UploadOutcome::Empty => "Nothing uploaded: the file is empty\n".to_string(),
        }
    }

    fn format_documents(&self, documents: &[Document]) -> String {
        if documents.is_empty() {
            return "No documents found.\n".to_string();
        }

        let mut output = String::new();
        let _ = writeln!(output, "Documents ({})", documents.len());
        let _ = writeln!(output, "---------");
        for document in documents {
            Self::document_line(&mut output, document);
        }
        output
    }

    fn format_document_outcome(&self, action: &str, outcome: &DocumentOutcome) -> String {
        let mut output = String::new();
        match outcome {
            DocumentOutcome::Done { document } => {
                let _ = writeln!(output, "{action}: document #{}", document.id);
                Self::document_line(&mut output, document);
                if let Some(ref error) = document.error_message {
                    let _ = writeln!(output, "  Error: {error}");
                }
                let _ = writeln!(output, "  Key:   {}", document.storage_key);
                let _ = writeln!(output, "  Added: {}", document.created_at.to_rfc3339());
            }
            DocumentOutcome::NotFound { document_id } => {
                let _ = writeln!(output, "Document #{document_id} not found");
            }
            DocumentOutcome::Unauthorized => {
                let _ = writeln!(output, "Not signed in or no roles: pass --user and --roles");
            }
            DocumentOutcome::Forbidden { document_id } => {
                let _ = writeln!(output, "Forbidden: document #{document_id} is outside your roles");
            }
            DocumentOutcome::Refused { document, reason } => {
                let _ = writeln!(output, "Refused: document #{}: {reason}", document.id);
            }
        }
        output
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Status");
        let _ = writeln!(output, "------");
        let _ = writeln!(output, "PostgreSQL:    {}", connected(status.database_connected));
        let _ = writeln!(output, "Redis:         {}", connected(status.redis_connected));
        let _ = writeln!(output, "  URL:         {}", status.redis_url);
        let embedding = if status.embedding_healthy {
            "[HEALTHY]"
        } else {
            "[UNAVAILABLE]"
        };
        let _ = writeln!(output, "Embedding:     {embedding}");
        let _ = writeln!(output, "  URL:         {}", status.embedding_url);
        let _ = writeln!(output);

        for (name, depth) in [
            ("Ingest queue", status.ingest_queue),
            ("Dead letters", status.dead_letter_queue),
        ] {
            match depth {
                Some(depth) => {
                    let _ = writeln!(
                        output,
                        "{name}:  {} entries, {} pending",
                        depth.length, depth.pending
                    );
                }
                None => {
                    let _ = writeln!(output, "{name}:  unknown");
                }
            }
        }

        if !status.documents.is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "Documents");
            for (doc_status, count) in &status.documents {
                let _ = writeln!(output, "  {:<11} {}", doc_status, count);
            }
        }
        output
    }

    fn format_worker_stats(&self, stats: &WorkerStats) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "Worker stopped");
        let _ = writeln!(output, "--------------");
        let _ = writeln!(output, "Acknowledged:       {}", stats.acked);
        let _ = writeln!(output, "Dead-lettered:      {}", stats.dead_lettered);
        let _ = writeln!(output, "Dead letters seen:  {}", stats.dead_letters_recorded);
        if stats.settle_failures > 0 {
            let _ = writeln!(output, "Settle failures:    {}", stats.settle_failures);
        }
        output
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", message)
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}\n", error)
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        let mut output = rendered.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e));
        output.push('\n');
        output
    }
}

impl Formatter for JsonFormatter {
    fn format_answer(&self, answer: &ChatAnswer) -> String {
        self.render(&serde_json::json!({
            "result": answer,
            "text": answer.text(),
        }))
    }

    fn format_upload(&self, outcome: &UploadOutcome) -> String {
        self.render(outcome)
    }

    fn format_documents(&self, documents: &[Document]) -> String {
        self.render(&serde_json::json!({ "documents": documents }))
    }

    fn format_document_outcome(&self, action: &str, outcome: &DocumentOutcome) -> String {
        self.render(&serde_json::json!({
            "action": action,
            "result": outcome,
        }))
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let documents: serde_json::Map<String, serde_json::Value> = status
            .documents
            .iter()
            .map(|(s, count)| (s.to_string(), serde_json::json!(count)))
            .collect();

        self.render(&serde_json::json!({
            "database": {
                "connected": status.database_connected,
            },
            "redis": {
                "url": status.redis_url,
                "connected": status.redis_connected,
            },
            "embedding": {
                "url": status.embedding_url,
                "healthy": status.embedding_healthy,
            },
            "queues": {
                "ingest": status.ingest_queue,
                "dead_letter": status.dead_letter_queue,
            },
            "documents": documents,
        }))
    }

    fn format_worker_stats(&self, stats: &WorkerStats) -> String {
        self.render(stats)
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", serde_json::json!({"message": message}))
    }

    fn format_error(&self, error: &str) -> String {
        format!("{}\n", serde_json::json!({"error": error}))
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document() -> Document {
        Document {
            id: 3,
            filename: "leave.txt".to_string(),
            storage_key: "kb-docs/hr/abc_leave.txt".to_string(),
            file_size: 12,
            content_type: None,
            content_hash: "abc".to_string(),
            permission_group: "hr".to_string(),
            status: DocumentStatus::Failed,
            error_message: Some("text extraction failed".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_text_answer_marks_cache_hits() {
        let answer = ChatAnswer::Answered {
            answer: "Twenty days.".to_string(),
            cached: true,
        };
        let text = TextFormatter.format_answer(&answer);
        assert!(text.starts_with("Twenty days."));
        assert!(text.contains("(cached)"));
    }

    #[test]
    fn test_text_document_outcome_shows_error() {
        let text = TextFormatter.format_document_outcome(
            "Show",
            &DocumentOutcome::Done {
                document: document(),
            },
        );
        assert!(text.contains("#3"));
        assert!(text.contains("FAILED"));
        assert!(text.contains("Error: text extraction failed"));
    }

    #[test]
    fn test_json_upload_is_tagged() {
        let json = JsonFormatter::new(false).format_upload(&UploadOutcome::Empty);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["outcome"], "empty");
    }

    #[test]
    fn test_json_status_counts() {
        let status = StatusInfo {
            database_connected: true,
            redis_url: "redis://localhost".to_string(),
            redis_connected: false,
            embedding_url: "http://localhost:11411".to_string(),
            embedding_healthy: false,
            ingest_queue: Some(QueueDepth {
                length: 4,
                pending: 1,
            }),
            dead_letter_queue: None,
            documents: vec![(DocumentStatus::Completed, 2)],
        };
        let json = JsonFormatter::new(true).format_status(&status);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["documents"]["COMPLETED"], 2);
        assert_eq!(value["queues"]["ingest"]["pending"], 1);
        assert!(value["queues"]["dead_letter"].is_null());
    }
}
