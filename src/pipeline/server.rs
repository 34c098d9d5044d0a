use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState, SharedState};
use super::db::{BuildDb, DbHandle};
use super::deploy::HttpDeployer;
use super::generation::OpenAiGenerator;
use super::launcher::JobLauncher;
use super::runner::PipelineRunner;
use super::stages::{StageExecutor, StageTimeouts};
use super::store::JobStore;
use crate::config::AppForgeConfig;

/// Configuration for the build server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3141,
            db_path: PathBuf::from(".appforge/builds.db"),
            dev_mode: false,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl From<&AppForgeConfig> for ServerConfig {
    fn from(config: &AppForgeConfig) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.server.db_path.clone(),
            dev_mode: config.server.dev_mode,
            shutdown_grace: config.server.shutdown_grace(),
        }
    }
}

/// Build the full application router with request tracing.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Wire store, services, runner and launcher into shared state.
pub fn build_state(store: JobStore, executor: StageExecutor, config: &AppForgeConfig) -> SharedState {
    let runner = Arc::new(PipelineRunner::start(
        store.clone(),
        Arc::new(executor),
        config.pipeline.queue_capacity,
    ));
    let launcher = JobLauncher::new(store.clone(), runner.clone(), &config.pipeline);
    Arc::new(AppState {
        store,
        launcher,
        runner,
        auto_build_default: config.pipeline.auto_build_default,
    })
}

/// Start the build server and block until Ctrl+C.
pub async fn start_server(config: &AppForgeConfig) -> Result<()> {
    let server = ServerConfig::from(config);

    if let Some(parent) = server.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = BuildDb::new(&server.db_path).with_context(|| {
        format!("Failed to open build database at {}", server.db_path.display())
    })?;
    let store = JobStore::new(DbHandle::new(db));

    let recovered = store
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted builds")?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "Marked interrupted builds as failed");
    }

    if config.generation.api_key().is_none() {
        warn!(
            env = %config.generation.api_key_env,
            "No generation API key set, requests will be sent unauthenticated"
        );
    }
    if config.deployment.endpoint.is_none() {
        info!("No deployment endpoint configured, builds will finish without previews");
    }

    let executor = StageExecutor::new(
        Arc::new(OpenAiGenerator::new(&config.generation)),
        Arc::new(HttpDeployer::new(&config.deployment)),
        StageTimeouts {
            generation: config.generation.timeout(),
            deployment: config.deployment.timeout(),
        },
    );
    let state = build_state(store, executor, config);
    let runner = state.runner.clone();
    let app = build_router(state, server.dev_mode);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Build server listening");
    println!("AppForge build server running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    runner.shutdown(server.shutdown_grace).await;
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
