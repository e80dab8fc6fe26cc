use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub sql: SqlConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_pool_size: usize,
    pub statement_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Ollama-compatible completion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub host: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

/// Qdrant collection holding the schema description documents
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub top_k: usize,
    /// Ollama host serving `/api/embed`
    pub embedding_host: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub on_failure: RetrievalFailurePolicy,
}

/// What a run does when the schema index cannot be reached
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalFailurePolicy {
    /// End the run on the error path
    FailFast,
    /// Continue to generation with no schema context
    Degrade,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlConfig {
    /// Authoritative row cap enforced by the validator
    pub max_limit: u64,
    /// Cap appended by the generator when the model omits a LIMIT
    pub generation_limit: u64,
    pub allowed_tables: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env first so its values participate in the overrides below
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "postgresql://postgres:postgres@db:5432/mydb")?
            .set_default("database.max_pool_size", 16)?
            .set_default("database.statement_timeout_secs", 30)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("llm.host", "http://ollama:11434")?
            .set_default("llm.model", "hf.co/TheBloke/sqlcoder-7B-GGUF:Q4_K_M")?
            .set_default("llm.temperature", 0.1)?
            .set_default("llm.timeout_secs", 600)?
            .set_default("retrieval.url", "http://qdrant:6333")?
            .set_default("retrieval.collection", "DDL")?
            .set_default("retrieval.top_k", 5)?
            .set_default("retrieval.embedding_host", "http://ollama:11434")?
            .set_default("retrieval.embedding_model", "all-minilm")?
            .set_default("retrieval.embedding_dim", 384)?
            .set_default("retrieval.on_failure", "fail_fast")?
            .set_default("sql.max_limit", 100)?
            .set_default("sql.generation_limit", 100)?
            .set_default("sql.allowed_tables", vec!["customers", "products", "orders"])?
            .set_default("logging.level", "info")?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(size) = env::var("DATABASE_MAX_POOL_SIZE") {
            builder = builder.set_override("database.max_pool_size", size.parse::<u64>().unwrap_or(16))?;
        }

        if let Ok(secs) = env::var("DATABASE_STATEMENT_TIMEOUT_SECS") {
            builder = builder.set_override("database.statement_timeout_secs", secs.parse::<u64>().unwrap_or(30))?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(8000))?;
        }

        // Embeddings come from the same Ollama unless EMBEDDING_HOST says otherwise
        if let Ok(ollama_host) = env::var("OLLAMA_HOST") {
            builder = builder
                .set_override("llm.host", ollama_host.clone())?
                .set_default("retrieval.embedding_host", ollama_host)?;
        }

        if let Ok(host) = env::var("EMBEDDING_HOST") {
            builder = builder.set_override("retrieval.embedding_host", host)?;
        }

        if let Ok(model) = env::var("OLLAMA_MODEL") {
            builder = builder.set_override("llm.model", model)?;
        }

        if let Ok(secs) = env::var("OLLAMA_TIMEOUT_SECS") {
            builder = builder.set_override("llm.timeout_secs", secs.parse::<u64>().unwrap_or(600))?;
        }

        if let Ok(qdrant_url) = env::var("QDRANT_URL") {
            builder = builder.set_override("retrieval.url", qdrant_url)?;
        }

        if let Ok(api_key) = env::var("QDRANT_API_KEY") {
            builder = builder.set_override("retrieval.api_key", Some(api_key))?;
        }

        if let Ok(collection) = env::var("QDRANT_COLLECTION") {
            builder = builder.set_override("retrieval.collection", collection)?;
        }

        if let Ok(model) = env::var("EMBEDDING_MODEL").or_else(|_| env::var("QDRANT_EMBEDDING_MODEL")) {
            builder = builder.set_override("retrieval.embedding_model", model)?;
        }

        if let Ok(dim) = env::var("QDRANT_EMBEDDING_DIM") {
            builder = builder.set_override("retrieval.embedding_dim", dim.parse::<u64>().unwrap_or(384))?;
        }

        if let Ok(policy) = env::var("RETRIEVAL_FAILURE_POLICY") {
            builder = builder.set_override("retrieval.on_failure", policy.to_lowercase())?;
        }

        // The generation cap follows SQL_MAX_LIMIT unless set on its own
        if let Ok(max_limit) = env::var("SQL_MAX_LIMIT") {
            let max_limit = max_limit.parse::<u64>().unwrap_or(100);
            builder = builder
                .set_override("sql.max_limit", max_limit)?
                .set_default("sql.generation_limit", max_limit)?;
        }

        if let Ok(limit) = env::var("SQL_GENERATION_LIMIT") {
            builder = builder.set_override("sql.generation_limit", limit.parse::<u64>().unwrap_or(100))?;
        }

        if let Ok(tables) = env::var("SQL_ALLOWED_TABLES") {
            builder = builder.set_override("sql.allowed_tables", parse_table_list(&tables))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_table_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("DATABASE_URL");
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("SQL_MAX_LIMIT");
        env::remove_var("SQL_GENERATION_LIMIT");
        env::remove_var("SQL_ALLOWED_TABLES");
        env::remove_var("RETRIEVAL_FAILURE_POLICY");
        env::remove_var("OLLAMA_HOST");
        env::remove_var("EMBEDDING_HOST");
        env::remove_var("EMBEDDING_MODEL");
        env::remove_var("QDRANT_EMBEDDING_MODEL");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sql.max_limit, 100);
        assert_eq!(config.sql.generation_limit, 100);
        assert_eq!(config.sql.allowed_tables, vec!["customers", "products", "orders"]);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.embedding_host, "http://ollama:11434");
        assert_eq!(config.retrieval.embedding_model, "all-minilm");
        assert_eq!(config.retrieval.embedding_dim, 384);
        assert_eq!(config.retrieval.on_failure, RetrievalFailurePolicy::FailFast);
    }

    #[test]
    fn test_parse_table_list() {
        assert_eq!(parse_table_list(" orders, customers ,,"), vec!["orders", "customers"]);
    }
}
