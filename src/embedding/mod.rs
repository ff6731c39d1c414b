/// Embedding provider trait and supporting types
///
/// Provides a pluggable interface for text embedding generation.
/// Supports a self-hosted Ollama server (default, no API key) and the OpenAI API.
/// Every provider produces vectors of EMBEDDING_DIMENSION floats; the documents table
/// column is declared with the same dimension.

pub mod ollama;
pub mod openai;
pub mod pipeline;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Vector length stored in the `documents.embedding` column.
pub const EMBEDDING_DIMENSION: usize = 768;

/// Status of embedding generation for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Complete,
    Failed,
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingStatus::Pending => write!(f, "pending"),
            EmbeddingStatus::Complete => write!(f, "complete"),
            EmbeddingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EmbeddingStatus::Pending),
            "complete" => Ok(EmbeddingStatus::Complete),
            "failed" => Ok(EmbeddingStatus::Failed),
            other => Err(format!("Unknown embedding status: {}", other)),
        }
    }
}

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider could not be reached (connection refused, DNS, timeout)
    #[error("Provider unreachable: {0}")]
    Unavailable(String),

    /// Provider answered but the payload was unusable (bad JSON, empty, wrong dimension)
    #[error("Malformed embedding response: {0}")]
    Malformed(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl EmbeddingError {
    /// Connection-level failure, as opposed to a bad answer for one input.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EmbeddingError::Unavailable(_))
    }

    /// Classify a reqwest error from sending the request or reading its body.
    ///
    /// Only a body that arrived complete but did not parse is `Malformed`. Timeouts
    /// and transport failures, mid-body ones included, are `Unavailable`.
    pub(crate) fn from_request(e: reqwest::Error) -> Self {
        if e.is_decode() && !e.is_timeout() {
            EmbeddingError::Malformed(format!("Failed to parse response: {}", e))
        } else {
            EmbeddingError::Unavailable(format!("HTTP request failed: {}", e))
        }
    }
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync to support use in async contexts
/// and across thread boundaries (e.g., Arc<dyn EmbeddingProvider>).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Return the model name identifier (e.g., "nomic-embed-text").
    fn model_name(&self) -> &str;

    /// Return the dimension of the embedding vectors produced by this model.
    fn dimension(&self) -> usize;
}

/// Provider for commands that never embed, such as keyword search.
///
/// Every call fails with `NotConfigured`, so building it needs no credentials.
pub struct DisabledProvider {
    reason: String,
}

impl DisabledProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        DisabledProvider { reason: reason.into() }
    }
}

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::NotConfigured(self.reason.clone()))
    }

    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

/// Embed `text`, bounded by `timeout`, and check the vector shape.
///
/// A timeout is reported as `Unavailable`; an empty, wrongly sized or non-finite
/// vector as `Malformed`.
pub async fn embed_checked(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, EmbeddingError> {
    let vector = tokio::time::timeout(timeout, provider.embed(text))
        .await
        .map_err(|_| {
            EmbeddingError::Unavailable(format!("embedding timed out after {:?}", timeout))
        })??;

    validate_vector(&vector, provider.dimension())?;
    Ok(vector)
}

/// Reject vectors the store cannot hold or compare.
pub fn validate_vector(vector: &[f32], dimension: usize) -> Result<(), EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::Malformed("provider returned an empty vector".to_string()));
    }
    if vector.len() != dimension {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} dimensions, got {}",
            dimension,
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbeddingError::Malformed("vector contains non-finite values".to_string()));
    }
    Ok(())
}

/// Build the text sent to the provider: title, blank line, content,
/// truncated to `max_chars` characters on a char boundary.
pub fn build_embedding_text(title: &str, content: &str, max_chars: usize) -> String {
    let full = if title.is_empty() {
        content.to_string()
    } else {
        format!("{}\n\n{}", title, content)
    };
    match full.char_indices().nth(max_chars) {
        Some((cut, _)) => full[..cut].to_string(),
        None => full,
    }
}
