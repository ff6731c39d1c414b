/// OpenAI embedding provider
///
/// Calls the OpenAI Embeddings API using reqwest.
/// Uses text-embedding-3-small shortened to EMBEDDING_DIMENSION via the `dimensions` parameter,
/// so vectors fit the same column as the Ollama default.
/// Requires VAULTSEARCH_EMBEDDING__OPENAI_API_KEY env var or embedding.openai_api_key in config.

use async_trait::async_trait;
use std::time::Duration;

use super::{EmbeddingError, EmbeddingProvider, EMBEDDING_DIMENSION};

/// Request body for OpenAI Embeddings API
#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
    model: &'a str,
    dimensions: usize,
}

/// Response from OpenAI Embeddings API
#[derive(serde::Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

/// Single embedding result from OpenAI
#[derive(serde::Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// OpenAI-backed embedding provider.
///
/// The API key is checked on construction.
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAIEmbeddingProvider {
    /// Create a new OpenAIEmbeddingProvider.
    ///
    /// # Errors
    /// Returns `EmbeddingError::NotConfigured` if api_key is empty.
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "OpenAI API key is required when using the openai embedding provider. \
                 Set VAULTSEARCH_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in vaultsearch.toml"
                    .to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::NotConfigured(format!("Failed to build HTTP client: {}", e)))?;

        Ok(OpenAIEmbeddingProvider { client, api_key, model })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbedRequest {
            input: text,
            model: &self.model,
            dimensions: EMBEDDING_DIMENSION,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(EmbeddingError::from_request)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api {
                status,
                message: body,
            });
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(EmbeddingError::from_request)?;

        embed_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Malformed("API returned empty embedding list".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}
