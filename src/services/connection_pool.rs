use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod};
use tokio_postgres::NoTls;

use crate::api::middleware::AppError;
use crate::config::DatabaseConfig;

/// Build the shared connection pool for the query database.
/// Connections are opened lazily on first checkout, so this does not touch
/// the network; the pool is safe to share across concurrent runs.
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let url = url::Url::parse(&config.url)
        .map_err(|e| AppError::Connection(format!("Invalid database URL: {}", e)))?;
    if url.scheme() != "postgresql" && url.scheme() != "postgres" {
        return Err(AppError::Connection(
            "Database URL must use postgresql:// or postgres:// scheme".to_string(),
        ));
    }

    tracing::info!(
        "Creating connection pool for: {} (max_size: {})",
        mask_credentials(&config.url),
        config.max_pool_size
    );

    let mut cfg = PgConfig::new();
    cfg.url = Some(config.url.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_pool_size));

    let pool = cfg
        .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            AppError::Connection(format!("Failed to create connection pool: {}", e))
        })?;

    Ok(pool)
}

/// Mask credentials in connection URL for safe logging
pub fn mask_credentials(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url) {
        let mut masked = parsed_url.clone();
        if parsed_url.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        "[invalid-url]".to_string()
    }
}
