//! Text embedding over a TEI-style HTTP server.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EmbeddingError;
use crate::models::EmbeddingConfig;
use crate::utils::{Backoff, with_retry};

/// Text to fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed texts, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse(Vec<Vec<f32>>);

/// Client for a TEI-compatible embedding server.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    dimension: usize,
    batch_size: usize,
    backoff: Backoff,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            backoff: Backoff::attempts(config.max_retries),
        })
    }

    /// `GET /health` must answer 2xx.
    pub async fn health_check(&self) -> Result<(), EmbeddingError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(classify)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(EmbeddingError::ServerError {
                status,
                body: String::new(),
            }),
        }
    }

    async fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest {
                inputs: texts,
                truncate: true,
            })
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServerError { status, body });
        }

        let EmbedResponse(vectors) = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        validate_batch(&vectors, texts.len(), self.dimension)?;
        Ok(vectors)
    }
}

fn classify(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout
    } else if e.is_connect() {
        EmbeddingError::ConnectionError(e.to_string())
    } else {
        EmbeddingError::RequestError(e)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(
                with_retry(&self.backoff, "embed", || self.embed_single_batch(batch)).await?,
            );
        }
        Ok(vectors)
    }
}

/// Reject responses whose shape does not match the request.
pub(crate) fn validate_batch(
    embeddings: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if embeddings.len() != expected_count {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected_count,
            embeddings.len()
        )));
    }
    if let Some(bad) = embeddings.iter().find(|v| v.len() != dimension) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = EmbeddingClient::new(&EmbeddingConfig::default()).unwrap();
        assert_eq!(client.dimension(), EmbeddingConfig::default().dimension);
    }

    #[test]
    fn test_base_url_trimming() {
        let config = EmbeddingConfig {
            url: "http://localhost:11411/".to_string(),
            ..Default::default()
        };
        let client = EmbeddingClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:11411");
    }

    #[test]
    fn test_request_body_shape() {
        let inputs = vec!["hello".to_string()];
        let body = serde_json::to_value(EmbedRequest {
            inputs: &inputs,
            truncate: true,
        })
        .unwrap();
        assert_eq!(body["inputs"][0], "hello");
        assert_eq!(body["truncate"], true);
    }

    #[test]
    fn test_validate_batch() {
        assert!(validate_batch(&[vec![0.0; 3]], 1, 3).is_ok());
        assert!(matches!(
            validate_batch(&[vec![0.0; 2]], 1, 3),
            Err(EmbeddingError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            validate_batch(&[], 1, 3),
            Err(EmbeddingError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let config = EmbeddingConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            max_retries: 1,
            ..Default::default()
        };
        let client = EmbeddingClient::new(&config).unwrap();
        assert!(client.embed("hello").await.is_err());
    }
}
