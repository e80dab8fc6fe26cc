use axum::{extract::State, Json};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{QueryInput, RunOutput};

/// Answer a natural-language question with a validated, executed query.
/// Run failures come back as a 200 with `error` set; only a blank question is
/// rejected outright.
pub async fn submit_question(
    State(state): State<AppState>,
    Json(payload): Json<QueryInput>,
) -> Result<Json<RunOutput>, AppError> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::Validation("Question cannot be empty".to_string()));
    }

    let output = state.orchestrator.run(question).await;
    Ok(Json(output))
}
