/// Ollama embedding provider
///
/// Calls the Ollama /api/embed endpoint. Uses nomic-embed-text (768 dimensions) by default,
/// no API key required for self-hosted deployments.
/// Supports VAULTSEARCH_EMBEDDING__OLLAMA_MODEL and VAULTSEARCH_EMBEDDING__OLLAMA_BASE_URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{EmbeddingError, EmbeddingProvider, EMBEDDING_DIMENSION};

/// Request body for Ollama /api/embed
#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// Response from Ollama /api/embed
#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama-backed embedding provider.
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingProvider {
    /// Create a new OllamaEmbeddingProvider.
    ///
    /// # Arguments
    /// * `base_url` - Ollama server base URL (e.g., "http://localhost:11434")
    /// * `model` - Model name (e.g., "nomic-embed-text")
    /// * `timeout` - Upper bound for a whole request, connect included
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| EmbeddingError::NotConfigured(format!("Failed to build HTTP client: {}", e)))?;

        Ok(OllamaEmbeddingProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embed", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbedRequest { model: &self.model, input: text })
            .send()
            .await
            .map_err(EmbeddingError::from_request)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api { status, message: body });
        }

        let embed_response: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(EmbeddingError::from_request)?;

        embed_response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Malformed("Ollama returned an empty embedding list".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}
