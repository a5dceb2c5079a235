//! Job status, cancellation and progress stream endpoints.
//!
//! - `GET  /api/jobs/:id`         - current snapshot
//! - `POST /api/jobs/:id/cancel`  - cancel a pending or running job
//! - `GET  /api/jobs/:id/events`  - SSE stream of progress, ends at terminal

use axum::{
    extract::{Extension, Path},
    response::sse::Sse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domains::pipeline::{ProgressUpdate, StageKind};
use crate::kernel::jobs::{Job, JobStatus};
use crate::kernel::sse::{job_event_stream, JobEventStream};
use crate::server::app::AppState;
use crate::server::error::ApiError;

/// Caller-facing view of a job. Lease bookkeeping stays internal.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub current_stage: Option<StageKind>,
    pub progress_updates: Vec<ProgressUpdate>,
    pub estimated_time_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub warnings: Vec<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let estimated_time_remaining = if job.is_terminal() {
            None
        } else {
            job.estimate_remaining(Utc::now())
                .or(job.estimated_time_remaining)
        };

        Self {
            job_id: job.id,
            status: job.status,
            progress_percentage: job.progress_percentage,
            current_stage: job.current_stage,
            progress_updates: job.progress_updates,
            estimated_time_remaining,
            result: job.result,
            error_message: job.error_message,
            warnings: job.warnings,
            cancel_requested: job.cancel_requested,
            created_at: job.created_at,
            started_at: job.started_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

pub async fn job_status_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.manager.get_status(job_id).await?;
    Ok(Json(job.into()))
}

pub async fn cancel_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.manager.cancel(job_id).await?;
    Ok(Json(job.into()))
}

pub async fn job_events_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<JobEventStream>, ApiError> {
    Ok(job_event_stream(&state.progress_hub, &state.manager, job_id).await?)
}
