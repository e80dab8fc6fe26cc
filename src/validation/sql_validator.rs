use std::collections::HashSet;
use thiserror::Error;

use crate::config::SqlConfig;
use crate::validation::sql_text::{self, SqlTokens};

/// Pseudo-table tolerated in FROM-adjacent positions (`EXTRACT(YEAR FROM CURRENT_DATE)`)
const CURRENT_DATE: &str = "current_date";

/// Reasons the validator refuses a query
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No SQL to validate.")]
    Empty,

    #[error("Forbidden or invalid SQL detected: {0}")]
    ForbiddenKeyword(String),

    #[error("Forbidden or invalid SQL detected: non-SELECT statement")]
    NonSelect,

    #[error("Multiple SQL statements detected; only one SELECT is allowed.")]
    MultipleStatements,

    #[error("No table referenced (missing FROM?).")]
    NoTable,

    #[error("Illegal table(s): {}", .0.join(", "))]
    IllegalTables(Vec<String>),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Empty => "VALIDATION_EMPTY",
            ValidationError::ForbiddenKeyword(_) => "VALIDATION_FORBIDDEN_KEYWORD",
            ValidationError::NonSelect => "VALIDATION_NON_SELECT",
            ValidationError::MultipleStatements => "VALIDATION_MULTI_STATEMENT",
            ValidationError::NoTable => "VALIDATION_NO_TABLE",
            ValidationError::IllegalTables(_) => "VALIDATION_ILLEGAL_TABLE",
        }
    }
}

/// Safety gate for model-written SQL.
///
/// Accepts only a single SELECT over allow-listed tables and returns it with a
/// bounded trailing LIMIT. The keyword denylist and the table allow-list are
/// both lexical, so neither is trusted on its own.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    allowed_tables: HashSet<String>,
    max_limit: u64,
}

impl SqlValidator {
    pub fn new<I, S>(allowed_tables: I, max_limit: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed_tables: HashSet<String> = allowed_tables
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        allowed_tables.insert(CURRENT_DATE.to_string());

        Self {
            allowed_tables,
            max_limit,
        }
    }

    pub fn from_config(config: &SqlConfig) -> Self {
        Self::new(&config.allowed_tables, config.max_limit)
    }

    pub fn max_limit(&self) -> u64 {
        self.max_limit
    }

    /// Validate `sql` and return the rewritten, row-bounded form.
    /// Checks run in a fixed order and the first failure is returned.
    pub fn validate(&self, sql: &str) -> Result<String, ValidationError> {
        if sql.trim().is_empty() {
            return Err(ValidationError::Empty);
        }

        // Runs on the raw text so it does not depend on tokenizing.
        if let Some(keyword) = sql_text::find_forbidden_keyword(sql) {
            return Err(ValidationError::ForbiddenKeyword(keyword.to_string()));
        }

        let tokens = SqlTokens::parse(sql).map_err(|e| {
            tracing::debug!("SQL failed to tokenize: {}", e);
            ValidationError::NonSelect
        })?;
        if !tokens.starts_with_select() {
            return Err(ValidationError::NonSelect);
        }

        let mut statements = tokens.statements();
        if statements.len() != 1 {
            return Err(ValidationError::MultipleStatements);
        }
        let statement = statements.remove(0);

        let tables = sql_text::referenced_tables(&statement);
        if tables.is_empty() {
            return Err(ValidationError::NoTable);
        }

        let mut illegal: Vec<String> = Vec::new();
        for table in tables {
            if !self.is_allowed(&table) && !illegal.contains(&table) {
                illegal.push(table);
            }
        }
        if !illegal.is_empty() {
            return Err(ValidationError::IllegalTables(illegal));
        }

        Ok(sql_text::enforce_limit(&statement, self.max_limit))
    }

    fn is_allowed(&self, table: &str) -> bool {
        self.allowed_tables.contains(&table.to_lowercase())
    }
}
