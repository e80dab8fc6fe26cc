// Query database access
pub mod adapter;
pub mod postgresql;

pub use adapter::{ExecutionError, SqlExecutor};
pub use postgresql::PostgresExecutor;
