use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

use crate::api::middleware::AppError;
use crate::config::RetrievalConfig;
use crate::services::schema_index::RetrievalError;

const EMBED_TIMEOUT_SECS: u64 = 60;

/// Turns text into dense vectors for the schema collection
#[async_trait::async_trait]
pub trait TextEmbedder: Send + Sync {
    /// One vector per input, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Batched embeddings from Ollama's `/api/embed`
pub struct OllamaEmbedder {
    endpoint: String,
    model: String,
    http_client: HttpClient,
}

impl OllamaEmbedder {
    pub fn new(config: &RetrievalConfig) -> Result<Self, AppError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(EMBED_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::LlmService(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: format!("{}/api/embed", config.embedding_host.trim_end_matches('/')),
            model: config.embedding_model.clone(),
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl TextEmbedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(format!("failed to reach {}: {}", self.endpoint, e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RetrievalError::Embedding(format!("{} returned {}: {}", self.endpoint, status, body)));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))?;

        check_embeddings(body.embeddings, texts.len())
    }
}

fn check_embeddings(embeddings: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>, RetrievalError> {
    if embeddings.len() != expected {
        return Err(RetrievalError::Embedding(format!(
            "got {} embeddings for {} inputs",
            embeddings.len(),
            expected
        )));
    }
    if embeddings.iter().any(Vec::is_empty) {
        return Err(RetrievalError::Embedding("empty embedding vector".to_string()));
    }
    Ok(embeddings)
}
