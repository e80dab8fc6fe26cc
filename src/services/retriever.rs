use std::collections::BTreeSet;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::config::RetrievalConfig;
use crate::models::SchemaContext;
use crate::services::embedder::{OllamaEmbedder, TextEmbedder};
use crate::services::schema_index::{RetrievalError, SchemaIndex, ScoredPoint};

/// Source of schema text used to ground SQL generation
#[async_trait::async_trait]
pub trait SchemaContextRetriever: Send + Sync {
    async fn retrieve(&self, question: &str) -> Result<SchemaContext, RetrievalError>;
}

/// Top-k semantic search over the Qdrant schema collection.
/// The question is embedded here and Qdrant only sees the vector.
pub struct QdrantRetriever {
    index: SchemaIndex,
    embedder: Arc<dyn TextEmbedder>,
    top_k: usize,
}

impl QdrantRetriever {
    pub fn new(config: &RetrievalConfig) -> Result<Self, AppError> {
        Ok(Self::with_embedder(
            SchemaIndex::new(config),
            Arc::new(OllamaEmbedder::new(config)?),
            config.top_k,
        ))
    }

    pub fn with_embedder(index: SchemaIndex, embedder: Arc<dyn TextEmbedder>, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
        }
    }
}

#[async_trait::async_trait]
impl SchemaContextRetriever for QdrantRetriever {
    async fn retrieve(&self, question: &str) -> Result<SchemaContext, RetrievalError> {
        let vector = self
            .embedder
            .embed(&[question.trim().to_string()])
            .await?
            .pop()
            .ok_or_else(|| RetrievalError::Embedding("no embedding returned".to_string()))?;

        let points = self.index.query(&vector, self.top_k).await?;
        tracing::debug!(
            "Schema search in '{}' returned {} match(es)",
            self.index.collection(),
            points.len()
        );
        Ok(context_from_points(&points))
    }
}

/// Keep ranking order for chunks; table names go into a set.
pub fn context_from_points(points: &[ScoredPoint]) -> SchemaContext {
    let chunks = points
        .iter()
        .filter_map(|p| p.document())
        .map(str::to_string)
        .collect();

    let tables: BTreeSet<String> = points
        .iter()
        .filter_map(|p| p.table())
        .map(str::to_string)
        .collect();

    SchemaContext { chunks, tables }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn point(score: f32, payload: serde_json::Value) -> ScoredPoint {
        ScoredPoint {
            score,
            payload: payload.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_context_keeps_rank_order_and_dedupes_tables() {
        let points = vec![
            point(0.9, json!({"document": "orders: id, customer_id, status", "table": "orders"})),
            point(0.8, json!({"document": "customers: id, name, email", "table": "customers"})),
            point(0.7, json!({"document": "orders.status is an enum", "table": "orders"})),
        ];
        let context = context_from_points(&points);
        assert_eq!(
            context.chunks,
            vec![
                "orders: id, customer_id, status",
                "customers: id, name, email",
                "orders.status is an enum"
            ]
        );
        assert_eq!(context.tables.len(), 2);
        assert!(context.tables.contains("orders"));
        assert!(context.tables.contains("customers"));
    }

    #[test]
    fn test_context_from_no_points_is_empty() {
        assert_eq!(context_from_points(&[]), SchemaContext::default());
    }

    /// Returns a fixed vector or fails, remembering what it was asked to embed
    struct StubEmbedder {
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl TextEmbedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            if self.fail {
                Err(RetrievalError::Embedding("model not found".to_string()))
            } else {
                Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
            }
        }
    }

    fn unreachable_config() -> RetrievalConfig {
        RetrievalConfig {
            url: "http://127.0.0.1:1".to_string(),
            api_key: None,
            collection: "DDL".to_string(),
            top_k: 5,
            embedding_host: "http://127.0.0.1:1".to_string(),
            embedding_model: "all-minilm".to_string(),
            embedding_dim: 3,
            on_failure: crate::config::RetrievalFailurePolicy::FailFast,
        }
    }

    fn retriever(fail: bool) -> (Arc<StubEmbedder>, QdrantRetriever) {
        let embedder = Arc::new(StubEmbedder {
            fail,
            seen: Mutex::new(Vec::new()),
        });
        let config = unreachable_config();
        let retriever = QdrantRetriever::with_embedder(SchemaIndex::new(&config), embedder.clone(), config.top_k);
        (embedder, retriever)
    }

    #[tokio::test]
    async fn test_embedding_failure_is_a_retrieval_error() {
        let (embedder, retriever) = retriever(true);
        let err = retriever.retrieve("  how many orders?  ").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Embedding(_)));
        assert_eq!(*embedder.seen.lock().unwrap(), vec!["how many orders?".to_string()]);
    }

    #[tokio::test]
    async fn test_question_is_embedded_before_searching() {
        let (embedder, retriever) = retriever(false);
        let err = retriever.retrieve("how many orders?").await.unwrap_err();
        // The vector reached the (unreachable) index
        assert!(matches!(err, RetrievalError::Transport(_)));
        assert_eq!(embedder.seen.lock().unwrap().len(), 1);
    }
}
