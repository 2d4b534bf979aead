use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

use super::{ChunkWriter, DocumentStore, check_dimension};
use crate::error::StoreError;
use crate::models::{
    DatabaseConfig, Document, DocumentStatus, NewChunk, NewDocument, RetrievedChunk,
};

const DOCUMENT_COLUMNS: &str = "id, filename, storage_key, file_size, content_type, content_hash, \
     permission_group, status, error_message, created_at";

/// PostgreSQL + pgvector backed document store.
pub struct PgDocumentStore {
    pool: PgPool,
    embedding_dim: usize,
}

impl PgDocumentStore {
    pub async fn connect(config: &DatabaseConfig, embedding_dim: usize) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_secs(config.pool_acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            pool,
            embedding_dim,
        })
    }

    pub async fn check_pgvector_extension(&self) -> Result<(), StoreError> {
        let result: Option<(String,)> =
            sqlx::query_as("SELECT extname FROM pg_extension WHERE extname = 'vector'")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::QueryError(e.to_string()))?;

        if result.is_none() {
            return Err(StoreError::PgVectorExtensionError(
                "pgvector extension is not installed. Run: CREATE EXTENSION vector;".to_string(),
            ));
        }

        Ok(())
    }

    /// Create tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            tracing::debug!(error = %e, "could not create vector extension");
        }
        self.check_pgvector_extension().await?;

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS kb_documents (
                id BIGSERIAL PRIMARY KEY,
                filename TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                file_size BIGINT NOT NULL,
                content_type TEXT,
                content_hash TEXT NOT NULL,
                permission_group TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (permission_group, content_hash)
            )
            "#
            .to_string(),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS document_chunks (
                    id BIGSERIAL PRIMARY KEY,
                    document_id BIGINT NOT NULL REFERENCES kb_documents(id) ON DELETE CASCADE,
                    chunk_index INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    metadata JSONB NOT NULL,
                    embedding vector({}) NOT NULL,
                    UNIQUE (document_id, chunk_index)
                )
                "#,
                self.embedding_dim
            ),
            "CREATE INDEX IF NOT EXISTS document_chunks_embedding_idx \
             ON document_chunks USING hnsw (embedding vector_l2_ops)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS document_chunks_document_id_idx \
             ON document_chunks (document_id)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS kb_documents_status_idx ON kb_documents (status)"
                .to_string(),
        ];

        for sql in &statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::SchemaError(e.to_string()))?;
        }

        tracing::info!(dimension = self.embedding_dim, "schema ready");
        Ok(())
    }

    fn row_to_document(row: &PgRow) -> Result<Document, StoreError> {
        let status: String = row.get("status");
        let status = status.parse().map_err(StoreError::InvalidData)?;
        let created_at: DateTime<Utc> = row.get("created_at");

        Ok(Document {
            id: row.get("id"),
            filename: row.get("filename"),
            storage_key: row.get("storage_key"),
            file_size: row.get("file_size"),
            content_type: row.get("content_type"),
            content_hash: row.get("content_hash"),
            permission_group: row.get("permission_group"),
            status,
            error_message: row.get("error_message"),
            created_at,
        })
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::ConnectionError(e.to_string()))
    }

    async fn insert_document(&self, document: NewDocument) -> Result<Document, StoreError> {
        let query = format!(
            r#"
            INSERT INTO kb_documents (filename, storage_key, file_size, content_type,
                                      content_hash, permission_group, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );

        let result = sqlx::query(&query)
            .bind(&document.filename)
            .bind(&document.storage_key)
            .bind(document.file_size)
            .bind(&document.content_type)
            .bind(&document.content_hash)
            .bind(&document.permission_group)
            .bind(DocumentStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Self::row_to_document(&row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate {
                    permission_group: document.permission_group,
                    content_hash: document.content_hash,
                })
            }
            Err(e) => Err(StoreError::QueryError(e.to_string())),
        }
    }

    async fn find_document(&self, id: i64) -> Result<Option<Document>, StoreError> {
        let query = format!("SELECT {DOCUMENT_COLUMNS} FROM kb_documents WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;

        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE kb_documents SET status = $2, error_message = $3 WHERE id = $1")
                .bind(document.id)
                .bind(document.status.as_str())
                .bind(&document.error_message)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::QueryError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(document.id));
        }
        Ok(())
    }

    async fn exists_by_hash_and_group(
        &self,
        content_hash: &str,
        permission_group: &str,
    ) -> Result<bool, StoreError> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM kb_documents WHERE content_hash = $1 AND permission_group = $2)",
        )
        .bind(content_hash)
        .bind(permission_group)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryError(e.to_string()))?;

        Ok(row.0)
    }

    async fn storage_key_in_use(&self, storage_key: &str) -> Result<bool, StoreError> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM kb_documents WHERE storage_key = $1)")
                .bind(storage_key)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::QueryError(e.to_string()))?;

        Ok(row.0)
    }

    async fn list_documents(&self, groups: &[String]) -> Result<Vec<Document>, StoreError> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM kb_documents \
             WHERE permission_group = ANY($1) ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&query)
            .bind(groups)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;

        rows.iter().map(Self::row_to_document).collect()
    }

    async fn count_by_status(&self) -> Result<Vec<(DocumentStatus, i64)>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM kb_documents GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryError(e.to_string()))?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = status.parse().map_err(StoreError::InvalidData)?;
                Ok((status, count))
            })
            .collect()
    }

    async fn count_chunks(&self, document_id: i64) -> Result<u64, StoreError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM document_chunks WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::QueryError(e.to_string()))?;

        Ok(row.0 as u64)
    }

    async fn delete_chunks_by_document_id(&self, document_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete_document(&self, document_id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM kb_documents WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::QueryError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn begin_chunk_replacement(
        &self,
        document_id: i64,
    ) -> Result<Box<dyn ChunkWriter>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::TransactionError(e.to_string()))?;

        let deleted = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::TransactionError(e.to_string()))?
            .rows_affected();

        Ok(Box::new(PgChunkWriter {
            tx,
            document_id,
            embedding_dim: self.embedding_dim,
            replaced: deleted,
            inserted: 0,
        }))
    }

    async fn nearest_chunks(
        &self,
        vector: &[f32],
        groups: &[String],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        check_dimension(vector, self.embedding_dim)?;
        if groups.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let embedding = Vector::from(vector.to_vec());
        let rows = sqlx::query(
            r#"
            SELECT
                c.document_id,
                c.chunk_index,
                c.content,
                (c.embedding <-> $1)::real AS distance
            FROM document_chunks c
            JOIN kb_documents d ON d.id = c.document_id
            WHERE d.permission_group = ANY($2)
            ORDER BY c.embedding <-> $1
            LIMIT $3
            "#,
        )
        .bind(&embedding)
        .bind(groups)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryError(e.to_string()))?;

        let results = rows
            .into_iter()
            .map(|row: PgRow| {
                let chunk_index: i32 = row.get("chunk_index");
                RetrievedChunk {
                    document_id: row.get("document_id"),
                    chunk_index: chunk_index as u32,
                    content: row.get("content"),
                    distance: row.get("distance"),
                }
            })
            .collect();

        Ok(results)
    }
}

struct PgChunkWriter {
    tx: Transaction<'static, Postgres>,
    document_id: i64,
    embedding_dim: usize,
    replaced: u64,
    inserted: u64,
}

#[async_trait]
impl ChunkWriter for PgChunkWriter {
    fn replaced(&self) -> u64 {
        self.replaced
    }

    async fn insert(&mut self, chunk: NewChunk) -> Result<(), StoreError> {
        if chunk.document_id != self.document_id {
            return Err(StoreError::InvalidData(format!(
                "chunk for document {} written to replacement of document {}",
                chunk.document_id, self.document_id
            )));
        }
        check_dimension(&chunk.embedding, self.embedding_dim)?;

        let metadata = serde_json::to_string(&chunk.metadata)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let embedding = Vector::from(chunk.embedding);

        let result = sqlx::query(
            r#"
            INSERT INTO document_chunks (document_id, chunk_index, content, metadata, embedding)
            VALUES ($1, $2, $3, $4::jsonb, $5)
            "#,
        )
        .bind(chunk.document_id)
        .bind(chunk.chunk_index as i32)
        .bind(&chunk.content)
        .bind(&metadata)
        .bind(&embedding)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(_) => {
                self.inserted += 1;
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::NotFound(self.document_id))
            }
            Err(e) => Err(StoreError::TransactionError(e.to_string())),
        }
    }

    async fn commit(self: Box<Self>) -> Result<u64, StoreError> {
        let inserted = self.inserted;
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::TransactionError(e.to_string()))?;
        Ok(inserted)
    }
}
