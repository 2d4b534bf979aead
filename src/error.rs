//! Error types for the ingestion pipeline and the answer service.

use reqwest::StatusCode;
use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server returned {status}: {body}")]
    ServerError { status: StatusCode, body: String },

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding timeout")]
    Timeout,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError { status, .. } => is_transient_status(*status),
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) | EmbeddingError::DimensionMismatch { .. } => false,
        }
    }
}

/// Errors related to the chat model.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to connect to chat model: {0}")]
    ConnectionError(String),

    #[error("chat model returned {status}: {body}")]
    ServerError { status: StatusCode, body: String },

    #[error("chat request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid chat response: {0}")]
    InvalidResponse(String),

    #[error("chat model timeout")]
    Timeout,
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::ConnectionError(_) | LlmError::Timeout => true,
            LlmError::ServerError { status, .. } => is_transient_status(*status),
            LlmError::RequestError(e) => e.is_timeout() || e.is_connect(),
            LlmError::InvalidResponse(_) => false,
        }
    }
}

/// Server-side failures and rate limiting are worth another attempt.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Errors raised while turning blob bytes into plain text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type for {filename}: .{extension}")]
    Unsupported { filename: String, extension: String },

    #[error("{filename} looks like binary content")]
    Binary { filename: String },

    #[error("{filename} is not valid UTF-8: {reason}")]
    InvalidUtf8 { filename: String, reason: String },

    #[error("{filename} exceeds maximum size of {max} bytes")]
    TooLarge { filename: String, max: u64 },

    #[error("{filename} is not a readable {format} document: {reason}")]
    Malformed {
        filename: String,
        format: &'static str,
        reason: String,
    },

    #[error("failed to read {filename}: {source}")]
    Read {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors related to the blob store.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to the relational document/chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to PostgreSQL: {0}")]
    ConnectionError(String),

    #[error("pgvector extension error: {0}")]
    PgVectorExtensionError(String),

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("query error: {0}")]
    QueryError(String),

    #[error("transaction error: {0}")]
    TransactionError(String),

    #[error("document not found: {0}")]
    NotFound(i64),

    #[error("document with hash {content_hash} already exists in group {permission_group}")]
    Duplicate {
        permission_group: String,
        content_hash: String,
    },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

/// Errors related to the shared key-value store (markers and cache).
#[derive(Debug, Error)]
pub enum KvError {
    #[error("failed to connect to Redis: {0}")]
    ConnectionError(String),

    #[error("Redis command failed: {0}")]
    CommandError(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            KvError::ConnectionError(err.to_string())
        } else {
            KvError::CommandError(err.to_string())
        }
    }
}

/// Errors related to the task broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    ConnectionError(String),

    #[error("publish failed: {0}")]
    PublishError(String),

    #[error("receive failed: {0}")]
    ReceiveError(String),

    #[error("settle failed for delivery {delivery_id}: {reason}")]
    SettleError { delivery_id: String, reason: String },

    #[error("task encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Terminal failure of one ingestion attempt.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("idempotency store unavailable: {0}")]
    Guard(#[from] KvError),

    #[error("failed to open blob: {0}")]
    Blob(#[from] BlobError),

    #[error("text extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("document {0} produced no text")]
    EmptyContent(i64),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("invalid status transition for document {document_id}: {from} -> {to}")]
    InvalidTransition {
        document_id: i64,
        from: String,
        to: String,
    },
}

/// Errors related to answering questions.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid question: {0}")]
    InvalidQuery(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("retrieval error: {0}")]
    Store(#[from] StoreError),

    #[error("chat model error: {0}")]
    Llm(#[from] LlmError),
}

/// Errors related to upload registration and document management.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("document {document_id} registered but its ingestion task was not enqueued: {source}")]
    Enqueue {
        document_id: i64,
        #[source]
        source: BrokerError,
    },

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("key-value store error: {0}")]
    Kv(#[from] KvError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("chat model error: {0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Other(String),
}
