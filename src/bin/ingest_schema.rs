// Rebuilds the schema document collection from a JSON file.
// Usage: ingest-schema [path]   (default: data/schema_documents.json)
use tracing::{error, info};

use querycraft_backend::config::Config;
use querycraft_backend::services::{load_documents, OllamaEmbedder, SchemaIndex, TextEmbedder};

const DEFAULT_DOCUMENTS_PATH: &str = "data/schema_documents.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_DOCUMENTS_PATH.to_string());

    // Fail on a bad file before touching the existing collection
    let documents = load_documents(&path)?;
    info!("Loaded {} schema document(s) from {}", documents.len(), path);

    // Embed before dropping anything so a missing model leaves the old collection intact
    let embedder = OllamaEmbedder::new(&config.retrieval)?;
    let texts: Vec<String> = documents.iter().map(|d| d.document.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    if let Some(dim) = vectors.first().map(Vec::len) {
        if dim != config.retrieval.embedding_dim {
            anyhow::bail!(
                "Model '{}' produces {}-dimensional vectors but the collection is configured for {}",
                config.retrieval.embedding_model,
                dim,
                config.retrieval.embedding_dim
            );
        }
    }
    info!("Embedded {} document(s) with '{}'", vectors.len(), config.retrieval.embedding_model);

    let index = SchemaIndex::new(&config.retrieval);
    if index.collection_exists().await? {
        info!("Dropping existing collection '{}'", index.collection());
        index.delete_collection().await?;
    }
    index
        .create_collection(config.retrieval.embedding_dim)
        .await?;

    let indexed = index.upsert_documents(&documents, &vectors).await?;
    info!(
        "Indexed {} schema docs into '{}' from '{}'",
        indexed,
        index.collection(),
        path
    );

    Ok(())
}
