use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::api::middleware::AppError;
use crate::config::LlmConfig;
use crate::models::StepError;
use crate::validation::sql_text;

/// Placeholder used in the prompt when retrieval found nothing
pub const NO_CONTEXT: &str = "NO CONTEXT";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to call LLM service: {0}")]
    Transport(String),

    #[error("LLM service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse LLM response: {0}")]
    Decode(String),
}

/// Single-shot text completion
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Client for Ollama's `/api/generate` endpoint (non-streaming)
pub struct OllamaClient {
    endpoint: String,
    model: String,
    temperature: f32,
    http_client: HttpClient,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, AppError> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::LlmService(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: format!("{}/api/generate", config.host.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl CompletionClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "options": { "temperature": self.temperature },
            }))
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Status { status, body });
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        Ok(result.response.unwrap_or_default().trim().to_string())
    }
}

/// Build the SQL-generation prompt. Context chunks keep their ranking order.
pub fn assemble_prompt(question: &str, context_chunks: &[String]) -> String {
    let context = if context_chunks.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        context_chunks.join("\n")
    };

    format!(
        r#"## Task
Generate a SQL query to answer the following question:
`{question}`

### Database Schema
This query will run on a database whose schema is represented in this string:
{context}

### SQL
Given the database schema, here is the SQL query that answers `{question}`:
```sql"#
    )
}

/// Pull the first statement out of a raw completion and make sure it carries
/// a trailing LIMIT. Returns None when nothing usable is left.
pub fn extract_sql(raw: &str, default_limit: u64) -> Option<String> {
    let cleaned = sql_text::strip_code_fences(raw);
    let first = sql_text::split_statements(&cleaned).into_iter().next()?;
    let sql = sql_text::trim_terminator(&first);
    if sql.is_empty() {
        return None;
    }

    if sql_text::trailing_limit(sql).is_some() {
        Some(sql.to_string())
    } else {
        Some(format!("{} LIMIT {}", sql, default_limit))
    }
}

/// Turns a question plus schema context into candidate SQL via the LLM
pub struct SqlGenerator<C: ?Sized = dyn CompletionClient> {
    default_limit: u64,
    client: std::sync::Arc<C>,
}

impl<C: CompletionClient + ?Sized> SqlGenerator<C> {
    pub fn new(client: std::sync::Arc<C>, default_limit: u64) -> Self {
        Self {
            default_limit,
            client,
        }
    }

    pub async fn generate(
        &self,
        question: &str,
        context_chunks: &[String],
        tables_in_scope: &BTreeSet<String>,
    ) -> Result<String, StepError> {
        tracing::debug!("Tables in scope: {:?}", tables_in_scope);
        let prompt = assemble_prompt(question.trim(), context_chunks);
        tracing::debug!("Prompt: {}", prompt);

        let raw = self.client.complete(&prompt).await.map_err(|e| match e {
            LlmError::Status { status, body } => StepError::GenerationUpstream { status, body },
            other => StepError::StepFailed {
                step: "generate",
                cause: other.to_string(),
            },
        })?;

        let sql = extract_sql(&raw, self.default_limit).ok_or(StepError::GenerationEmptyOutput)?;
        tracing::info!("Generated SQL: {}", sql);
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio_test::assert_err;

    /// Returns a canned completion and remembers the prompt it was given
    struct CannedCompletion {
        reply: Result<String, (u16, String)>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedCompletion {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn status(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err((status, body.to_string())),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl CompletionClient for CannedCompletion {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err((status, body)) => Err(LlmError::Status {
                    status: *status,
                    body: body.clone(),
                }),
            }
        }
    }

    #[test]
    fn test_assemble_prompt_with_context() {
        let prompt = assemble_prompt(
            "How many orders?",
            &["orders(id, status)".to_string(), "customers(id, name)".to_string()],
        );
        assert!(prompt.contains("`How many orders?`"));
        assert!(prompt.contains("orders(id, status)\ncustomers(id, name)"));
        assert!(!prompt.contains(NO_CONTEXT));
        assert!(prompt.ends_with("```sql"));
    }

    #[test]
    fn test_assemble_prompt_without_context() {
        let prompt = assemble_prompt("q", &[]);
        assert!(prompt.contains(NO_CONTEXT));
        assert_eq!(prompt, assemble_prompt("q", &[]));
    }

    #[test]
    fn test_extract_sql_appends_limit() {
        assert_eq!(
            extract_sql("SELECT * FROM orders", 100).as_deref(),
            Some("SELECT * FROM orders LIMIT 100")
        );
    }

    #[test]
    fn test_extract_sql_strips_fences_and_keeps_limit() {
        assert_eq!(
            extract_sql("```sql\nSELECT name FROM customers LIMIT 5000\n```", 100).as_deref(),
            Some("SELECT name FROM customers LIMIT 5000")
        );
    }

    #[test]
    fn test_extract_sql_takes_first_statement() {
        assert_eq!(
            extract_sql("SELECT * FROM secrets; DROP TABLE orders;", 100).as_deref(),
            Some("SELECT * FROM secrets LIMIT 100")
        );
        assert_eq!(
            extract_sql("SELECT id FROM orders LIMIT 3;\n\nThis query lists orders.", 100).as_deref(),
            Some("SELECT id FROM orders LIMIT 3")
        );
    }

    #[test]
    fn test_extract_sql_keeps_literals_verbatim() {
        assert_eq!(
            extract_sql("```sql\nSELECT * FROM customers WHERE name = 'O''Brien';\n```", 100).as_deref(),
            Some("SELECT * FROM customers WHERE name = 'O''Brien' LIMIT 100")
        );
        assert_eq!(
            extract_sql("SELECT * FROM customers WHERE name = 'a'' OR ''1''=''1' LIMIT 5", 100).as_deref(),
            Some("SELECT * FROM customers WHERE name = 'a'' OR ''1''=''1' LIMIT 5")
        );
        assert_eq!(
            extract_sql("SELECT * FROM customers WHERE name = E'a\\'b'", 100).as_deref(),
            Some("SELECT * FROM customers WHERE name = E'a\\'b' LIMIT 100")
        );
    }

    #[test]
    fn test_extract_sql_empty() {
        assert_eq!(extract_sql("", 100), None);
        assert_eq!(extract_sql("```sql\n```", 100), None);
        assert_eq!(extract_sql(" ;; ", 100), None);
    }

    #[tokio::test]
    async fn test_generate_uses_context_in_prompt() {
        let client = CannedCompletion::ok("SELECT * FROM orders");
        let generator = SqlGenerator::new(client.clone(), 100);
        let sql = generator
            .generate("all orders", &["orders(id)".to_string()], &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT * FROM orders LIMIT 100");
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("orders(id)"));
    }

    #[tokio::test]
    async fn test_generate_reports_upstream_status() {
        let generator = SqlGenerator::new(CannedCompletion::status(503, "model loading"), 100);
        let err = generator.generate("q", &[], &BTreeSet::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "LLM error 503: model loading");
    }

    #[tokio::test]
    async fn test_generate_reports_empty_output() {
        let generator = SqlGenerator::new(CannedCompletion::ok("   "), 100);
        let result = generator.generate("q", &[], &BTreeSet::new()).await;
        assert_err!(&result);
        assert_eq!(result.unwrap_err(), StepError::GenerationEmptyOutput);
    }
}
