mod channel;
mod config;
mod core;
mod engine;
mod server;
mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::channel::ChannelHub;
use crate::config::ServerConfig;
use crate::core::LanguageSpecFactory;
use crate::engine::container::DockerRuntime;
use crate::engine::ExecutionService;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runbox=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;
    info!(
        "Config: max_concurrent_runs={}, timeout={:?}, memory={}MB, pids_limit={}",
        config.max_concurrent_runs,
        config.isolation.timeout,
        config.isolation.memory_bytes / (1024 * 1024),
        config.isolation.pids_limit
    );

    let languages = LanguageSpecFactory::builtin()?;
    info!("Supported languages: {:?}", languages.supported_languages());

    info!("Starting Runbox...");

    let runtime = DockerRuntime::connect()?;
    runtime.ping().await?;
    info!("Connected to Docker daemon");

    // Runner images are built ahead of time; warn instead of pulling
    let images = languages.images();
    let missing = runtime.missing_images(images.iter().map(String::as_str)).await;
    for image in &missing {
        warn!("Runner image {} is not available locally", image);
    }

    let hub = Arc::new(ChannelHub::new());
    let service = ExecutionService::new(Arc::new(runtime), languages, hub.clone(), &config);
    let state = AppState {
        service: Arc::new(service),
        hub,
    };

    server::serve(config.bind_addr, state)
        .await
        .context("Server terminated")?;

    info!("Runbox stopped");
    Ok(())
}
