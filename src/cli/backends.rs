//! Production adapters wired from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::models::Config;
use crate::pipeline::IngestionPipeline;
use crate::services::{
    CacheManager, ChatModelClient, ChatService, DocumentExtractor, DocumentService,
    EmbeddingClient, IdempotencyGuard, LocalBlobStore, PgDocumentStore, RedisKeyValueStore,
    RedisStreamBroker,
};

pub async fn document_store(config: &Config) -> Result<Arc<PgDocumentStore>> {
    let store = PgDocumentStore::connect(&config.database, config.embedding.dimension)
        .await
        .context("failed to connect to PostgreSQL")?;
    Ok(Arc::new(store))
}

pub async fn kv_store(config: &Config) -> Result<Arc<RedisKeyValueStore>> {
    let store = RedisKeyValueStore::connect(&config.redis.url)
        .await
        .context("failed to connect to Redis")?;
    Ok(Arc::new(store))
}

pub async fn broker(config: &Config) -> Result<Arc<RedisStreamBroker>> {
    let broker = RedisStreamBroker::connect(&config.redis.url, &config.queue)
        .await
        .context("failed to connect to the Redis task broker")?;
    Ok(Arc::new(broker))
}

pub fn blob_store(config: &Config) -> Arc<LocalBlobStore> {
    Arc::new(LocalBlobStore::new(config.storage.root.clone()))
}

pub fn embedder(config: &Config) -> Result<Arc<EmbeddingClient>> {
    let client =
        EmbeddingClient::new(&config.embedding).context("failed to create embedding client")?;
    Ok(Arc::new(client))
}

pub async fn document_service(config: &Config) -> Result<DocumentService> {
    let store = document_store(config).await?;
    let broker = broker(config).await?;
    Ok(DocumentService::new(blob_store(config), store, broker))
}

pub async fn chat_service(config: &Config) -> Result<ChatService> {
    let store = document_store(config).await?;
    let kv = kv_store(config).await?;
    let llm = ChatModelClient::new(&config.llm).context("failed to create chat model client")?;

    Ok(ChatService::new(
        embedder(config)?,
        store,
        Arc::new(llm),
        CacheManager::new(kv),
        &config.chat,
    ))
}

pub async fn ingestion_pipeline(config: &Config) -> Result<IngestionPipeline> {
    let store = document_store(config).await?;
    let kv = kv_store(config).await?;
    let guard = IdempotencyGuard::new(kv, config.ingestion.marker_ttl());

    Ok(IngestionPipeline::new(
        guard,
        store,
        blob_store(config),
        Arc::new(DocumentExtractor::new(config.ingestion.max_file_size)),
        embedder(config)?,
        &config.ingestion,
        config.embedding.batch_size,
    ))
}
