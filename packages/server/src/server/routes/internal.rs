//! POST /internal/jobs/run
//!
//! Worker endpoint the HTTP task queue delivers to. The response is the
//! queue's acknowledgement: any 2xx stops redelivery.
//!
//! - Ran, already finished, or unknown job: `200`
//! - Another delivery holds a live lease: `409`, so the queue retries and
//!   can take over if that worker dies
//! - Store failure: `500`

use axum::{extract::Extension, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::error;

use crate::kernel::jobs::{DispatchMessage, DispatchOutcome, JobStatus};
use crate::server::app::AppState;

pub async fn run_job_handler(
    Extension(state): Extension<AppState>,
    Json(message): Json<DispatchMessage>,
) -> (StatusCode, Json<Value>) {
    match state.worker.handle_dispatch(message.job_id).await {
        Ok(DispatchOutcome::Executed(status)) => (
            StatusCode::OK,
            Json(json!({ "job_id": message.job_id, "outcome": "executed", "status": status })),
        ),
        Ok(DispatchOutcome::Duplicate(JobStatus::Processing)) => (
            StatusCode::CONFLICT,
            Json(json!({ "job_id": message.job_id, "outcome": "in_progress" })),
        ),
        Ok(DispatchOutcome::Duplicate(status)) => (
            StatusCode::OK,
            Json(json!({ "job_id": message.job_id, "outcome": "duplicate", "status": status })),
        ),
        Ok(DispatchOutcome::NotFound) => (
            StatusCode::OK,
            Json(json!({ "job_id": message.job_id, "outcome": "not_found" })),
        ),
        Err(e) => {
            error!(job_id = %message.job_id, error = %e, "dispatch handling failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "job_id": message.job_id, "error": "internal error" })),
            )
        }
    }
}
