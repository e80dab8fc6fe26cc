pub mod connection_pool;
pub mod database; // Query execution against PostgreSQL
pub mod embedder;
pub mod llm_service;
pub mod orchestrator;
pub mod retriever;
pub mod schema_index; // Qdrant REST client for schema documents
pub mod schema_loader;

pub use connection_pool::*;
pub use embedder::*;
pub use llm_service::*;
pub use orchestrator::*;
pub use retriever::*;
pub use schema_index::*;
pub use schema_loader::*;
