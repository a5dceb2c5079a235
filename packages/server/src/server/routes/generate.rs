//! POST /api/generate
//!
//! Asynchronous requests answer `202 Accepted` with the job handle;
//! synchronous requests block until the job is terminal and answer `200`.

use axum::{extract::Extension, http::StatusCode, Json};

use super::jobs::JobView;
use crate::domains::generation::GenerationRequest;
use crate::kernel::jobs::JobStatus;
use crate::server::app::AppState;
use crate::server::error::ApiError;

pub async fn generate_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<JobView>), ApiError> {
    let job = state.manager.submit(request).await?;

    let status = match job.status {
        JobStatus::Pending | JobStatus::Queued | JobStatus::Processing => StatusCode::ACCEPTED,
        JobStatus::Completed | JobStatus::Failed => StatusCode::OK,
    };

    Ok((status, Json(job.into())))
}
