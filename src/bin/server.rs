//! ragpipe server binary
//!
//! Run with: cargo run --bin ragpipe-server [config.toml]

use ragpipe::{config::AppConfig, server::Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragpipe=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    tracing::info!("configuration loaded");
    tracing::info!("  - embedding model: {} ({} dims)", config.embedding.model, config.embedding.dimension);
    tracing::info!("  - vector provider: {:?}", config.search.vector_provider);
    tracing::info!("  - queue: {} concurrent, {} attempts", config.queue.max_concurrent_jobs, config.queue.retry_max_attempts);
    tracing::info!("  - upload dir: {}", config.storage.upload_dir.display());
    if config.server.api_key.is_none() {
        tracing::warn!("no API key configured; /api routes are open");
    }

    let server = Server::new(config).await?;
    tracing::info!("starting ragpipe on {}", server.address());
    server.start().await?;

    Ok(())
}
