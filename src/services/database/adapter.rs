// Executor seam between the orchestrator and the query database
use thiserror::Error;

use crate::models::Row;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to get connection from pool: {0}")]
    Pool(String),

    #[error("query timeout after {0} seconds")]
    Timeout(u64),

    #[error("{0}")]
    Query(String),
}

/// Runs already-validated SQL. Implementations do not re-validate.
#[async_trait::async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Execute a single query and return its rows in database order
    async fn execute(&self, sql: &str) -> Result<Vec<Row>, ExecutionError>;
}
