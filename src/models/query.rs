use serde::{Deserialize, Serialize};

use super::run_state::Row;

/// Body of `POST /agent/query`
#[derive(Debug, Clone, Deserialize)]
pub struct QueryInput {
    pub question: String,
}

/// Final response of a run. Failed runs still produce this shape with `error` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunOutput {
    pub sql: Option<String>,
    pub rows: Option<Vec<Row>>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_code: Option<String>,
    pub tables_in_scope: Vec<String>,
    pub context_chunks: Vec<String>,
    pub run_id: String,
}

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub ollama_host: String,
    pub data_model: String,
}
