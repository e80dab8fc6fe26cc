use std::collections::BTreeSet;

use thiserror::Error;
use uuid::Uuid;

use super::query::RunOutput;
use crate::validation::ValidationError;

/// One result row: column name to JSON value, in SELECT order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Failure recorded on a run. Every variant is a normal terminal outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("Schema retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("LLM error {status}: {body}")]
    GenerationUpstream { status: u16, body: String },

    #[error("LLM returned empty SQL.")]
    GenerationEmptyOutput,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("DB error: {0}")]
    Execution(String),

    /// Unexpected failure caught at a step boundary
    #[error("{step} failed: {cause}")]
    StepFailed { step: &'static str, cause: String },
}

impl StepError {
    pub fn code(&self) -> &'static str {
        match self {
            StepError::RetrievalUnavailable(_) => "RETRIEVAL_UNAVAILABLE",
            StepError::GenerationUpstream { .. } => "GENERATION_UPSTREAM_ERROR",
            StepError::GenerationEmptyOutput => "GENERATION_EMPTY_OUTPUT",
            StepError::Validation(e) => e.code(),
            StepError::Execution(_) => "EXECUTION_FAILURE",
            StepError::StepFailed { .. } => "STEP_FAILED",
        }
    }
}

/// What a single step changed. The orchestrator merges these into `RunState`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDelta {
    Retrieved {
        context_chunks: Vec<String>,
        tables_in_scope: BTreeSet<String>,
    },
    Generated {
        sql: String,
    },
    /// Accepted by the validator; `sql` is the rewritten safe form
    Validated {
        sql: String,
    },
    Rejected(ValidationError),
    Executed {
        rows: Vec<Row>,
    },
    Failed(StepError),
    Unchanged,
}

/// Accumulated state of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub run_id: String,
    pub question: String,
    pub context_chunks: Vec<String>,
    pub tables_in_scope: BTreeSet<String>,
    pub sql: Option<String>,
    pub is_valid: Option<bool>,
    pub rows: Option<Vec<Row>>,
    pub error: Option<StepError>,
}

impl RunState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            question: question.into(),
            context_chunks: Vec::new(),
            tables_in_scope: BTreeSet::new(),
            sql: None,
            is_valid: None,
            rows: None,
            error: None,
        }
    }

    /// Merge a step delta. Later writes win for every field except `error`,
    /// where the first recorded failure is kept.
    pub fn apply(&mut self, delta: StepDelta) {
        match delta {
            StepDelta::Retrieved {
                context_chunks,
                tables_in_scope,
            } => {
                self.context_chunks = context_chunks;
                self.tables_in_scope = tables_in_scope;
            }
            StepDelta::Generated { sql } => {
                self.sql = Some(sql);
            }
            StepDelta::Validated { sql } => {
                self.sql = Some(sql);
                self.is_valid = Some(true);
            }
            StepDelta::Rejected(reason) => {
                self.is_valid = Some(false);
                self.record_error(reason.into());
            }
            StepDelta::Executed { rows } => {
                self.rows = Some(rows);
            }
            StepDelta::Failed(error) => self.record_error(error),
            StepDelta::Unchanged => {}
        }
    }

    fn record_error(&mut self, error: StepError) {
        if self.error.is_none() {
            self.error = Some(error);
        } else {
            tracing::debug!("Keeping first error, dropping later one: {}", error);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_output(self) -> RunOutput {
        RunOutput {
            sql: self.sql,
            rows: self.rows,
            error_code: self.error.as_ref().map(|e| e.code().to_string()),
            error: self.error.map(|e| e.to_string()),
            tables_in_scope: self.tables_in_scope.into_iter().collect(),
            context_chunks: self.context_chunks,
            run_id: self.run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_new_state_has_run_id_and_question() {
        let a = RunState::new("how many orders?");
        let b = RunState::new("how many orders?");
        assert_eq!(a.question, "how many orders?");
        assert_ne!(a.run_id, b.run_id);
        assert!(a.sql.is_none() && a.error.is_none() && a.rows.is_none());
    }

    #[test]
    fn test_validated_sql_overwrites_generated_sql() {
        let mut state = RunState::new("q");
        state.apply(StepDelta::Generated {
            sql: "SELECT * FROM orders LIMIT 5000".into(),
        });
        state.apply(StepDelta::Validated {
            sql: "SELECT * FROM orders LIMIT 100".into(),
        });
        assert_eq!(state.sql.as_deref(), Some("SELECT * FROM orders LIMIT 100"));
        assert_eq!(state.is_valid, Some(true));
    }

    #[test]
    fn test_first_error_wins() {
        let mut state = RunState::new("q");
        state.apply(StepDelta::Failed(StepError::GenerationEmptyOutput));
        state.apply(StepDelta::Rejected(ValidationError::Empty));
        assert_eq!(state.error, Some(StepError::GenerationEmptyOutput));
        assert_eq!(state.is_valid, Some(false));
    }

    #[test]
    fn test_rejection_keeps_attempted_sql() {
        let mut state = RunState::new("q");
        state.apply(StepDelta::Generated {
            sql: "SELECT name FROM unknown_table LIMIT 100".into(),
        });
        state.apply(StepDelta::Rejected(ValidationError::IllegalTables(vec![
            "unknown_table".into(),
        ])));
        let output = state.into_output();
        assert_eq!(output.sql.as_deref(), Some("SELECT name FROM unknown_table LIMIT 100"));
        assert_eq!(output.error.as_deref(), Some("Illegal table(s): unknown_table"));
        assert_eq!(output.error_code.as_deref(), Some("VALIDATION_ILLEGAL_TABLE"));
        assert!(output.rows.is_none());
    }

    #[test]
    fn test_retrieval_fields_are_replaced() {
        let mut state = RunState::new("q");
        state.apply(StepDelta::Retrieved {
            context_chunks: vec!["orders table".into(), "customers table".into()],
            tables_in_scope: ["orders".to_string(), "customers".to_string()].into(),
        });
        state.apply(StepDelta::Unchanged);
        assert_eq!(state.context_chunks, vec!["orders table", "customers table"]);
        let output = state.into_output();
        assert_eq!(output.tables_in_scope, vec!["customers", "orders"]);
    }

    #[test]
    fn test_executed_rows_in_output() {
        let mut state = RunState::new("q");
        state.apply(StepDelta::Executed {
            rows: vec![row(json!({"id": 1})), row(json!({"id": 2}))],
        });
        let output = state.into_output();
        assert_eq!(output.rows.unwrap().len(), 2);
        assert!(output.error.is_none());
        assert!(output.error_code.is_none());
    }

    #[test]
    fn test_row_columns_keep_select_order() {
        let mut r = Row::new();
        r.insert("name".to_string(), json!("Ada"));
        r.insert("id".to_string(), json!(7));
        r.insert("created_at".to_string(), json!("2024-01-01"));

        let mut state = RunState::new("q");
        state.apply(StepDelta::Executed { rows: vec![r] });
        let output = state.into_output();

        let columns: Vec<&str> = output.rows.as_ref().unwrap()[0].keys().map(String::as_str).collect();
        assert_eq!(columns, vec!["name", "id", "created_at"]);
        let body = serde_json::to_string(&output).unwrap();
        assert!(body.contains(r#"{"name":"Ada","id":7,"created_at":"2024-01-01"}"#));
    }

    #[test]
    fn test_step_error_messages() {
        let err = StepError::GenerationUpstream {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "LLM error 500: boom");
        let err = StepError::StepFailed {
            step: "retrieve",
            cause: "panicked".into(),
        };
        assert_eq!(err.to_string(), "retrieve failed: panicked");
        assert_eq!(StepError::Execution("x".into()).to_string(), "DB error: x");
    }
}
