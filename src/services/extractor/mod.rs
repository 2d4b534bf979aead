//! Text extraction from blob streams.
//!
//! PDF and Office Open XML uploads go through their format readers; anything
//! else must be UTF-8 text.

mod office;

pub use self::office::DocumentFormat;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::error::ExtractError;
use crate::services::blob_store::BlobReader;
use crate::utils::{file_extension, is_binary_extension};

/// Byte stream + filename (+ declared content type) to plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        reader: BlobReader,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<String, ExtractError>;
}

/// Routes PDF, DOCX, PPTX and XLSX to their readers and decodes the rest as
/// UTF-8 text (plain text, markdown, source code, csv…).
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    max_file_size: u64,
}

impl DocumentExtractor {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    async fn read_bounded(&self, reader: BlobReader, filename: &str) -> Result<Vec<u8>, ExtractError> {
        let mut bytes = Vec::new();
        reader
            .take(self.max_file_size.saturating_add(1))
            .read_to_end(&mut bytes)
            .await
            .map_err(|source| ExtractError::Read {
                filename: filename.to_string(),
                source,
            })?;

        if bytes.len() as u64 > self.max_file_size {
            return Err(ExtractError::TooLarge {
                filename: filename.to_string(),
                max: self.max_file_size,
            });
        }
        Ok(bytes)
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(
        &self,
        reader: BlobReader,
        filename: &str,
        content_type: Option<&str>,
    ) -> Result<String, ExtractError> {
        let extension = file_extension(filename);
        let format = DocumentFormat::detect(extension.as_deref(), content_type);

        if format.is_none() {
            if let Some(extension) = extension.filter(|ext| is_binary_extension(ext)) {
                return Err(ExtractError::Unsupported {
                    filename: filename.to_string(),
                    extension,
                });
            }
        }

        let bytes = self.read_bounded(reader, filename).await?;
        match format {
            Some(format) => extract_document(format, bytes, filename).await,
            None => decode_text(bytes, filename),
        }
    }
}

/// Parsers run on the blocking pool; a parser panic counts as a malformed file.
async fn extract_document(
    format: DocumentFormat,
    bytes: Vec<u8>,
    filename: &str,
) -> Result<String, ExtractError> {
    let malformed = |reason: String| ExtractError::Malformed {
        filename: filename.to_string(),
        format: format.label(),
        reason,
    };

    let parsed = tokio::task::spawn_blocking(move || format.extract(&bytes))
        .await
        .map_err(|e| malformed(format!("parser aborted: {e}")))?;
    let text = parsed.map_err(malformed)?;

    tracing::debug!(filename, format = format.label(), chars = text.len(), "document text extracted");
    Ok(text)
}

fn decode_text(mut bytes: Vec<u8>, filename: &str) -> Result<String, ExtractError> {
    if bytes.contains(&0) {
        return Err(ExtractError::Binary {
            filename: filename.to_string(),
        });
    }
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        bytes.drain(..3);
    }
    String::from_utf8(bytes).map_err(|e| ExtractError::InvalidUtf8 {
        filename: filename.to_string(),
        reason: e.utf8_error().to_string(),
    })
}

#[cfg(test)]
pub(crate) use self::office::fixtures;
