use axum::{extract::State, Json};

use crate::api::handlers::AppState;
use crate::models::HealthStatus;

/// Liveness plus the configured model endpoint; touches no collaborator
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "Ok".to_string(),
        ollama_host: state.config.llm.host.clone(),
        data_model: state.config.llm.model.clone(),
    })
}
