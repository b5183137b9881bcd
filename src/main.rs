//! # GPU Transcribe Backend - Main Application Entry Point
//!
//! An asynchronous transcription service: clients upload a media file, get
//! a job id back immediately, and poll for the transcript while the single
//! GPU works through the queue one job at a time.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (TOML file + environment variables)
//! - **state**: shared application state and request metrics
//! - **jobs**: the core — job store, bounded single-worker queue, worker
//!   loop and lifecycle controller
//! - **storage**: blob storage for uploads and transcripts
//! - **transcription**: the GPU transcriber subprocess behind a trait
//! - **handlers**: HTTP adapters over the job controller
//! - **middleware**: request logging and per-endpoint metrics
//! - **error**: error taxonomy and HTTP error responses
//!
//! ## Process-wide state:
//! Exactly one job store, one queue and one worker loop exist per process,
//! constructed here at startup and passed down explicitly. The worker is
//! the only component that ever touches the GPU; it is joined on shutdown
//! after the queue is closed and drained.

mod config;
mod error;
mod handlers;
mod health;
mod jobs;
mod middleware;
mod state;
mod storage;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer, middleware::Logger};
use anyhow::Result;
use config::AppConfig;
use jobs::{JobQueue, JobStore, Worker};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::FsStorage;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::SubprocessEngine;

/// Global shutdown signal, set by the SIGTERM/SIGINT handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting gpu-transcribe-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        "Queue capacity {}, retention {}h, engine '{}' (model {})",
        config.queue.capacity,
        config.queue.retention_hours,
        config.engine.command,
        config.engine.model
    );

    // Wire up the process-wide job core: one store, one queue, one worker.
    let store = JobStore::new();
    let queue = JobQueue::new(config.queue.capacity);
    let storage: Arc<dyn storage::Storage> = Arc::new(FsStorage::new(&config.storage.data_dir)?);
    let engine: Arc<dyn transcription::TranscriptionEngine> =
        Arc::new(SubprocessEngine::new(config.engine.clone())?);

    // The queue hands out exactly one worker token; a second worker loop
    // against the same GPU is a configuration error caught right here.
    let worker_token = queue
        .take_worker_token()
        .ok_or_else(|| anyhow::anyhow!("A worker loop is already attached to this queue"))?;
    let worker_handle = Worker::new(
        worker_token,
        store.clone(),
        queue.clone(),
        engine,
        storage.clone(),
    )
    .spawn();

    spawn_cleanup_task(store.clone(), &config);

    let app_state = AppState::new(config.clone(), store, queue.clone(), storage);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/jobs", web::post().to(handlers::submit_job))
                    .route("/jobs/{id}", web::get().to(handlers::job_status))
                    .route("/jobs/{id}/result", web::get().to(handlers::job_result))
                    .route("/jobs/{id}", web::delete().to(handlers::cancel_job))
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
            )
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Stop admission, let the worker drain what is queued, then join it.
    info!("Draining job queue...");
    queue.close();
    if let Err(e) = worker_handle.await {
        error!("Worker task error: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls verbosity; the default keeps this crate at debug
/// and actix at info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gpu_transcribe_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodically evict terminal jobs past the configured retention window,
/// so the store does not grow without bound.
fn spawn_cleanup_task(store: JobStore, config: &AppConfig) {
    let retention = chrono::Duration::hours(config.queue.retention_hours as i64);
    let interval = std::time::Duration::from_secs(config.queue.cleanup_interval_hours * 3600);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = store.evict_terminal_older_than(retention);
            if evicted > 0 {
                info!("Evicted {} expired jobs", evicted);
            }
        }
    });
}

/// Set up SIGTERM/SIGINT handlers for graceful shutdown.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, polling every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
