pub mod blob_store;
pub mod broker;
pub mod cache;
pub mod chat;
pub mod chunker;
pub mod document_store;
pub mod embedding;
pub mod extractor;
pub mod guard;
pub mod kv_store;
pub mod llm;
pub mod upload;

pub use blob_store::{BlobReader, BlobStore, LocalBlobStore, MemoryBlobStore, storage_key};
pub use broker::{Delivery, MemoryBroker, Queue, QueueDepth, RedisStreamBroker, TaskBroker};
pub use cache::{CacheManager, cache_key_for_chat};
pub use chat::{ChatService, render_prompt};
pub use chunker::{TokenTextSplitter, count_tokens};
pub use document_store::{ChunkWriter, DocumentStore, MemoryDocumentStore, PgDocumentStore};
pub use embedding::{Embedder, EmbeddingClient};
pub use extractor::{DocumentExtractor, DocumentFormat, TextExtractor};
pub use guard::{IdempotencyGuard, MarkerToken, marker_key};
pub use kv_store::{KeyValueStore, MemoryKeyValueStore, RedisKeyValueStore};
pub use llm::{ChatModelClient, LanguageModel};
pub use upload::{DocumentService, Upload};
