use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::Instrument;

use crate::api::middleware::AppError;
use crate::config::{Config, RetrievalFailurePolicy};
use crate::models::{RunOutput, RunState, StepDelta, StepError};
use crate::services::connection_pool::create_pool;
use crate::services::database::{PostgresExecutor, SqlExecutor};
use crate::services::llm_service::{CompletionClient, OllamaClient, SqlGenerator};
use crate::services::retriever::{QdrantRetriever, SchemaContextRetriever};
use crate::validation::SqlValidator;

/// Positions in the run graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Retrieve,
    Generate,
    Validate,
    Execute,
    Error,
    Done,
}

impl Phase {
    /// Transition table. Any step that left an error routes to `Error`;
    /// leaving `Validate` additionally requires an explicit acceptance.
    pub fn next(self, state: &RunState) -> Phase {
        match self {
            Phase::Start => Phase::Retrieve,
            Phase::Retrieve if state.has_error() => Phase::Error,
            Phase::Retrieve => Phase::Generate,
            Phase::Generate if state.has_error() => Phase::Error,
            Phase::Generate => Phase::Validate,
            Phase::Validate if state.is_valid == Some(true) && !state.has_error() => Phase::Execute,
            Phase::Validate => Phase::Error,
            Phase::Execute | Phase::Error | Phase::Done => Phase::Done,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Retrieve => "retrieve",
            Phase::Generate => "generate",
            Phase::Validate => "validate",
            Phase::Execute => "execute",
            Phase::Error => "error",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives one question through retrieval, generation, validation and execution
pub struct Orchestrator {
    retriever: Arc<dyn SchemaContextRetriever>,
    generator: SqlGenerator,
    validator: SqlValidator,
    executor: Arc<dyn SqlExecutor>,
    retrieval_policy: RetrievalFailurePolicy,
}

impl Orchestrator {
    pub fn new(
        retriever: Arc<dyn SchemaContextRetriever>,
        generator: SqlGenerator,
        validator: SqlValidator,
        executor: Arc<dyn SqlExecutor>,
        retrieval_policy: RetrievalFailurePolicy,
    ) -> Self {
        Self {
            retriever,
            generator,
            validator,
            executor,
            retrieval_policy,
        }
    }

    /// Wire the production collaborators: Qdrant, Ollama and PostgreSQL
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let retriever = Arc::new(QdrantRetriever::new(&config.retrieval)?);
        let llm_client: Arc<dyn CompletionClient> = Arc::new(OllamaClient::new(&config.llm)?);
        let pool = create_pool(&config.database)?;
        let executor = Arc::new(PostgresExecutor::new(
            pool,
            config.database.statement_timeout_secs,
        ));

        if config.sql.generation_limit > config.sql.max_limit {
            tracing::warn!(
                "Generation limit {} exceeds validator limit {}; the validator will clamp it",
                config.sql.generation_limit,
                config.sql.max_limit
            );
        }

        Ok(Self::new(
            retriever,
            SqlGenerator::new(llm_client, config.sql.generation_limit),
            SqlValidator::from_config(&config.sql),
            executor,
            config.retrieval.on_failure,
        ))
    }

    /// Run a fresh state machine for `question`. Always reaches `Done`.
    pub async fn run(&self, question: &str) -> RunOutput {
        let state = RunState::new(question.trim());
        let span = tracing::info_span!("run", run_id = %state.run_id);
        self.drive(state).instrument(span).await.into_output()
    }

    async fn drive(&self, mut state: RunState) -> RunState {
        tracing::info!("Processing question: {}", state.question);
        let mut phase = Phase::Start;

        while phase != Phase::Done {
            let delta = self.guarded_step(phase, &state).await;
            state.apply(delta);
            let next = phase.next(&state);
            tracing::debug!("{} -> {}", phase, next);
            phase = next;
        }

        match &state.error {
            Some(error) => tracing::warn!("Run finished with error: {}", error),
            None => tracing::info!(
                "Run finished with {} row(s)",
                state.rows.as_ref().map_or(0, Vec::len)
            ),
        }
        state
    }

    /// Errors and panics escaping a step body become a failure delta
    async fn guarded_step(&self, phase: Phase, state: &RunState) -> StepDelta {
        match AssertUnwindSafe(self.step(phase, state)).catch_unwind().await {
            Ok(Ok(delta)) => delta,
            Ok(Err(e)) => {
                tracing::error!("Step {} failed: {:#}", phase, e);
                StepDelta::Failed(StepError::StepFailed {
                    step: phase.name(),
                    cause: format!("{:#}", e),
                })
            }
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                tracing::error!("Step {} panicked: {}", phase, cause);
                StepDelta::Failed(StepError::StepFailed {
                    step: phase.name(),
                    cause,
                })
            }
        }
    }

    async fn step(&self, phase: Phase, state: &RunState) -> anyhow::Result<StepDelta> {
        let delta = match phase {
            Phase::Start | Phase::Error | Phase::Done => StepDelta::Unchanged,
            Phase::Retrieve => self.retrieve(state).await,
            Phase::Generate => self.generate(state).await,
            Phase::Validate => self.validate(state),
            Phase::Execute => self.execute(state).await?,
        };
        Ok(delta)
    }

    async fn retrieve(&self, state: &RunState) -> StepDelta {
        match self.retriever.retrieve(&state.question).await {
            Ok(context) => {
                tracing::info!(
                    "Retrieved {} context chunk(s), tables in scope: {:?}",
                    context.chunks.len(),
                    context.tables
                );
                StepDelta::Retrieved {
                    context_chunks: context.chunks,
                    tables_in_scope: context.tables,
                }
            }
            Err(e) => match self.retrieval_policy {
                RetrievalFailurePolicy::FailFast => {
                    StepDelta::Failed(StepError::RetrievalUnavailable(e.to_string()))
                }
                RetrievalFailurePolicy::Degrade => {
                    tracing::warn!("Schema retrieval failed, continuing without context: {}", e);
                    StepDelta::Retrieved {
                        context_chunks: Vec::new(),
                        tables_in_scope: Default::default(),
                    }
                }
            },
        }
    }

    async fn generate(&self, state: &RunState) -> StepDelta {
        match self
            .generator
            .generate(&state.question, &state.context_chunks, &state.tables_in_scope)
            .await
        {
            Ok(sql) => StepDelta::Generated { sql },
            Err(e) => StepDelta::Failed(e),
        }
    }

    fn validate(&self, state: &RunState) -> StepDelta {
        let sql = state.sql.as_deref().unwrap_or_default();
        match self.validator.validate(sql) {
            Ok(safe_sql) => {
                if safe_sql != sql {
                    tracing::info!("Validator rewrote SQL to: {}", safe_sql);
                }
                StepDelta::Validated { sql: safe_sql }
            }
            Err(reason) => {
                tracing::warn!("SQL rejected: {}", reason);
                StepDelta::Rejected(reason)
            }
        }
    }

    async fn execute(&self, state: &RunState) -> anyhow::Result<StepDelta> {
        // The transition table only routes validated runs here.
        let sql = state
            .sql
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no validated SQL in state"))?;

        Ok(match self.executor.execute(sql).await {
            Ok(rows) => StepDelta::Executed { rows },
            Err(e) => StepDelta::Failed(StepError::Execution(e.to_string())),
        })
    }
}
