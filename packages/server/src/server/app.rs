//! Application setup and router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use provider_gateway::Gateway;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::jobs::{JobManager, JobWorker};
use crate::kernel::ProgressHub;
use crate::server::routes::{
    cancel_job_handler, generate_handler, health_handler, job_events_handler, job_status_handler,
    run_job_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
    pub worker: Arc<JobWorker>,
    pub progress_hub: ProgressHub,
    pub gateway: Arc<Gateway>,
    /// Present when jobs are stored in Postgres.
    pub db_pool: Option<PgPool>,
}

/// Build the Axum application router.
///
/// `request_timeout` bounds the public API routes; it must exceed the job
/// timeout so synchronous generation can finish. The worker endpoint and the
/// event stream are not bounded by it.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    // CORS configuration - allow any origin
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let api = Router::new()
        .route("/api/generate", post(generate_handler))
        .route("/api/jobs/:id", get(job_status_handler))
        .route("/api/jobs/:id/cancel", post(cancel_job_handler))
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        .merge(api)
        .route("/api/jobs/:id/events", get(job_events_handler))
        .route("/internal/jobs/run", post(run_job_handler))
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
