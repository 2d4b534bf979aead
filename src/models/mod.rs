mod config;
mod document;
mod outcome;
mod task;

pub use config::{
    ChatConfig, Config, DEFAULT_CONSUMER_GROUP, DEFAULT_DATABASE_URL, DEFAULT_DEAD_LETTER_STREAM,
    DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_URL, DEFAULT_INGEST_STREAM, DEFAULT_LLM_URL,
    DEFAULT_REDIS_URL, DatabaseConfig, EmbeddingConfig, IngestionConfig, LlmConfig, LoggingConfig,
    MAX_TOP_K, QueueConfig, RedisConfig, StorageConfig,
};
pub use document::{
    CHUNK_SOURCE_TAG, ChunkMetadata, Document, DocumentStatus, InvalidTransition, NewChunk,
    NewDocument, RetrievedChunk,
};
pub use outcome::{
    ChatAnswer, DocumentOutcome, NO_RELEVANT_CONTENT, OutputFormat, UNAUTHORIZED, UploadOutcome,
};
pub use task::{IngestionTask, RequestContext};
