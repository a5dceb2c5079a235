use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    job_store: JobStoreHealth,
    response_cache: CacheHealth,
}

#[derive(Serialize)]
pub struct JobStoreHealth {
    kind: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    idle_connections: Option<usize>,
}

#[derive(Serialize)]
pub struct CacheHealth {
    hits: u64,
    misses: u64,
    writes: u64,
    hit_rate: f64,
}

/// Health check endpoint
///
/// Checks:
/// - Job store connectivity (Postgres only)
/// - Response cache counters
///
/// Returns 200 OK if the job store is reachable, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let job_store = match &state.db_pool {
        None => JobStoreHealth {
            kind: "memory".to_string(),
            status: "ok".to_string(),
            error: None,
            pool_size: None,
            idle_connections: None,
        },
        Some(pool) => {
            let (status, error) = match tokio::time::timeout(
                std::time::Duration::from_secs(5),
                sqlx::query("SELECT 1").execute(pool),
            )
            .await
            {
                Ok(Ok(_)) => ("ok", None),
                Ok(Err(e)) => ("error", Some(format!("Query failed: {}", e))),
                Err(_) => ("error", Some("Query timeout (>5s)".to_string())),
            };
            JobStoreHealth {
                kind: "postgres".to_string(),
                status: status.to_string(),
                error,
                pool_size: Some(pool.size()),
                idle_connections: Some(pool.num_idle()),
            }
        }
    };

    let stats = state.gateway.cache().stats();
    let response_cache = CacheHealth {
        hits: stats.hits,
        misses: stats.misses,
        writes: stats.writes,
        hit_rate: stats.hit_rate(),
    };

    let is_healthy = job_store.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            job_store,
            response_cache,
        }),
    )
}
