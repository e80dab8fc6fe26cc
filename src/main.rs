use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use querycraft_backend::api;
use querycraft_backend::config::Config;
use querycraft_backend::services::Orchestrator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting server on {}", config.server_address());
    info!(
        "LLM: {} ({}), schema index: {}/{}",
        config.llm.host, config.llm.model, config.retrieval.url, config.retrieval.collection
    );

    let orchestrator = Arc::new(Orchestrator::from_config(&config).map_err(|e| {
        error!("Failed to initialize agent: {}", e);
        e
    })?);

    // Create router with state
    let app: Router = api::routes::create_router_with_state(orchestrator, config.clone());

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
