mod auth;
mod config;
mod db;
mod errors;
mod models;
mod render;
mod routes;
mod state;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::auth::JwtVerifier;
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::render::artifacts::{ArtifactStore, LocalArtifactStore, S3ArtifactStore};
use crate::render::janitor::Janitor;
use crate::render::pg_store::PgJobStore;
use crate::render::renderer::LatexRenderer;
use crate::render::service::RenderService;
use crate::render::source::PgResumeSource;
use crate::render::worker::{RenderWorker, WorkerConfig, WorkerPool};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting render API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL; every worker may hold a connection while rendering.
    let db = create_pool(&config.database_url, config.render_workers as u32 + 10).await?;
    run_migrations(&db).await?;

    // Initialize artifact storage (S3 / MinIO unless ARTIFACT_DIR is set)
    let artifacts: Arc<dyn ArtifactStore> = match &config.artifact_dir {
        Some(dir) => {
            let store = LocalArtifactStore::new(dir.clone()).await?;
            info!("Storing render artifacts under {}", store.root().display());
            Arc::new(store)
        }
        None => {
            let s3 = build_s3_client(&config).await;
            info!("S3 client initialized (bucket: {})", config.s3_bucket);
            Arc::new(S3ArtifactStore::new(s3, config.s3_bucket.clone()))
        }
    };

    let renderer = LatexRenderer::from_command_line(&config.latex_command)
        .context("LATEX_COMMAND must name a program")?;
    info!("Rendering with '{}'", renderer.program());

    let jobs = Arc::new(PgJobStore::new(db.clone()));
    let resumes = Arc::new(PgResumeSource::new(db.clone()));
    let render = RenderService::new(jobs.clone(), resumes.clone(), artifacts.clone());

    // Start the worker pool and the retention janitor
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_config = WorkerConfig {
        workers: config.render_workers,
        render_timeout: config.render_timeout,
        idle_poll: config.worker_idle_poll,
    };
    let worker = Arc::new(RenderWorker::new(
        jobs.clone(),
        resumes,
        Arc::new(renderer),
        artifacts.clone(),
        config.render_timeout,
    )
    .with_abandon_grace(config.render_abandon_grace));
    let pool = WorkerPool::spawn(worker, render.wakeup(), &worker_config, shutdown_rx.clone());
    info!(
        "Render worker pool started ({} workers, {}s timeout)",
        pool.size(),
        config.render_timeout.as_secs()
    );

    let janitor = Janitor::new(jobs, artifacts, config.artifact_ttl)
        .spawn(config.janitor_interval, shutdown_rx);

    // Build app state
    let state = AppState {
        render,
        verifier: Arc::new(JwtVerifier::new(&config.jwt_secret)),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop claiming new jobs; in-flight renders run to completion.
    info!("HTTP server stopped; draining render workers");
    let _ = shutdown_tx.send(true);
    pool.join().await;
    if let Err(e) = janitor.await {
        tracing::error!("Render janitor failed to stop: {e:?}");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "templar-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    // MinIO serves buckets by path, not virtual host.
    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT (Ctrl-C), starting graceful shutdown"),
        () = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
