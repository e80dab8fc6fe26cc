use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::models::SchemaDocument;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("schema index unreachable: {0}")]
    Transport(String),

    #[error("schema index returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected schema index response: {0}")]
    Decode(String),

    #[error("embedding service error: {0}")]
    Embedding(String),
}

/// One scored match from a collection query
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScoredPoint {
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Map<String, Value>,
}

impl ScoredPoint {
    pub fn document(&self) -> Option<&str> {
        self.payload.get("document").and_then(Value::as_str)
    }

    pub fn table(&self) -> Option<&str> {
        self.payload.get("table").and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    points: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    result: ExistsResult,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

/// Minimal Qdrant REST client for the schema document collection.
/// Works on plain dense vectors; embedding happens before calling it.
#[derive(Clone)]
pub struct SchemaIndex {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    http_client: HttpClient,
}

impl SchemaIndex {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            http_client: HttpClient::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RetrievalError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RetrievalError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RetrievalError::Status { status, body });
        }

        Ok(response)
    }

    /// Semantic top-`limit` search, most relevant first
    pub async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<ScoredPoint>, RetrievalError> {
        let request = self.http_client.post(self.collection_url("/points/query")).json(&json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        }));

        let response: QueryResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))?;

        Ok(response.result.points)
    }

    pub async fn collection_exists(&self) -> Result<bool, RetrievalError> {
        let request = self.http_client.get(self.collection_url("/exists"));
        let response: ExistsResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| RetrievalError::Decode(e.to_string()))?;
        Ok(response.result.exists)
    }

    pub async fn delete_collection(&self) -> Result<(), RetrievalError> {
        self.send(self.http_client.delete(self.collection_url(""))).await?;
        Ok(())
    }

    pub async fn create_collection(&self, dim: usize) -> Result<(), RetrievalError> {
        let request = self.http_client.put(self.collection_url("")).json(&json!({
            "vectors": { "size": dim, "distance": "Cosine" },
        }));
        self.send(request).await?;
        Ok(())
    }

    /// Insert documents with their vectors; each payload is the metadata plus
    /// the text under `document`
    pub async fn upsert_documents(
        &self,
        documents: &[SchemaDocument],
        vectors: &[Vec<f32>],
    ) -> Result<usize, RetrievalError> {
        if documents.len() != vectors.len() {
            return Err(RetrievalError::Embedding(format!(
                "{} vectors for {} documents",
                vectors.len(),
                documents.len()
            )));
        }

        let points: Vec<Value> = documents
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": vector,
                    "payload": document_payload(doc),
                })
            })
            .collect();

        let request = self
            .http_client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }));
        self.send(request).await?;

        Ok(documents.len())
    }
}

fn document_payload(doc: &SchemaDocument) -> Value {
    let mut payload = doc.metadata.clone();
    payload.insert("document".to_string(), Value::String(doc.document.clone()));
    Value::Object(payload)
}
