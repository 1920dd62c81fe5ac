//! HTTP and WebSocket API for GrandGuru.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/crawl` | Launch a crawl job |
//! | `GET`  | `/crawl/{job_id}` | Job lifecycle state |
//! | `GET`  | `/logs/ws/{job_id}` | WebSocket log stream, one JSON event per frame |
//! | `POST` | `/logs/stop/{job_id}` | Stop a job (idempotent) |
//! | `GET`  | `/products` | List products |
//! | `GET`  | `/products/{id}` | One product |
//! | `GET`  | `/search?q=` | Full-text search over ingested documents |
//! | `GET`  | `/health` | Health check |
//!
//! Errors are returned as `{"error": {"code": "...", "message": "..."}}`.

mod catalog;
mod error;
mod jobs;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use grandguru_core::JobService;
use grandguru_shared::{AppConfig, GrandGuruError, Result};
use grandguru_storage::Storage;

pub use error::AppError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub storage: Arc<Storage>,
    pub config: Arc<AppConfig>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/crawl", post(jobs::launch))
        .route("/crawl/", post(jobs::launch))
        .route("/crawl/{job_id}", get(jobs::status))
        .route("/logs/ws/{job_id}", get(jobs::logs_ws))
        .route("/logs/ws/{job_id}/", get(jobs::logs_ws))
        .route("/logs/stop/{job_id}", post(jobs::stop))
        .route("/logs/stop/{job_id}/", post(jobs::stop))
        .route("/products", get(catalog::list_products))
        .route("/products/", get(catalog::list_products))
        .route("/products/{id}", get(catalog::get_product))
        .route("/search", get(catalog::search))
        .route("/health", get(catalog::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on `bind` until Ctrl-C, then stop any jobs still running.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let eviction = state.jobs.spawn_eviction();
    let jobs = state.jobs.clone();

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| GrandGuruError::Network(format!("failed to bind {bind}: {e}")))?;
    info!(%bind, "api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GrandGuruError::Network(format!("server error: {e}")))?;

    info!("shutting down");
    jobs.shutdown().await;
    eviction.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
