use anyhow::{Context, Result};
use podcast_engine::assembly::FfmpegAssembler;
use podcast_engine::config::EngineConfig;
use podcast_engine::ingest::BasicIngester;
use podcast_engine::jobs::{ManagerSettings, SqliteJobStore, TaskManager};
use podcast_engine::pipeline::{EngineBackends, Pipeline};
use podcast_engine::server::{self, AppState};
use podcast_engine::storage::LocalObjectStorage;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config_path = EngineConfig::default_path();
    let config = EngineConfig::load(&config_path);

    ensure_sqlite_dir(&config.jobs.database_url)?;
    let store = SqliteJobStore::connect(&config.jobs.database_url)
        .await
        .with_context(|| format!("opening job database {}", config.jobs.database_url))?;

    std::fs::create_dir_all(&config.storage.root)
        .with_context(|| format!("creating artifact root {}", config.storage.root.display()))?;
    let storage = Arc::new(LocalObjectStorage::new(
        &config.storage.root,
        &config.server.public_base_url,
    ));

    let backends = EngineBackends::new(
        config.script.clone(),
        config.tts.clone(),
        Arc::new(BasicIngester::new(&config.ingest)),
        Arc::new(FfmpegAssembler::new(config.assembler.clone())),
    );
    let pipeline = Pipeline::new(Arc::new(backends), config.pipeline_settings());

    let manager = TaskManager::new(
        Arc::new(store),
        storage.clone(),
        pipeline,
        config.pricing.clone(),
        ManagerSettings::from_config(&config.jobs),
    );
    manager
        .recover_orphans()
        .await
        .context("failing jobs left over from a previous run")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let (_, http) = server::bind(
        &config.server,
        AppState {
            manager: manager.clone(),
            storage,
        },
        async move { signal.cancelled().await },
    )?;

    info!(
        max_concurrent_jobs = config.jobs.max_concurrent_jobs,
        "podcast engine ready"
    );
    tokio::select! {
        _ = http => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
    }
    shutdown.cancel();

    if !manager.shutdown(config.jobs.shutdown_grace()).await {
        tracing::warn!("exiting with workers still running");
    }
    info!("podcast engine stopped");
    Ok(())
}

/// SQLite creates the file but not its directory.
fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(file) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let file = file.split('?').next().unwrap_or(file);
    if file.is_empty() || file.contains(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(file).parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    Ok(())
}
