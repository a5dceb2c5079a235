//! Router tests with `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::*;
use generation_core::kernel::jobs::JobStatus;
use generation_core::server::{build_app, AppState};
use http_body_util::BodyExt;
use provider_gateway::{CacheTtlTable, Gateway, MockTransport, OperationRegistry, ResponseCache};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(harness: &TestHarness) -> Router {
    let gateway = Gateway::new(
        Arc::new(MockTransport::new()),
        ResponseCache::in_memory(CacheTtlTable::default()),
        OperationRegistry::seo_defaults(),
    );

    build_app(
        AppState {
            manager: harness.manager.clone(),
            worker: harness.worker.clone(),
            progress_hub: harness.hub.clone(),
            gateway: Arc::new(gateway),
            db_pool: None,
        },
        Duration::from_secs(30),
    )
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn synchronous_generate_returns_the_result() {
    let harness = TestHarness::new(happy_stages());

    let response = app(&harness)
        .oneshot(post_json("/api/generate", json!({"topic": "Rust async", "keywords": ["tokio"]})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress_percentage"], 100);
    assert_eq!(body["result"]["title"], "Scripted Article");
    assert!(body.get("worker_id").is_none());
}

#[tokio::test]
async fn asynchronous_generate_is_accepted_and_pollable() {
    let harness = TestHarness::new(happy_stages());
    let app = app(&harness);

    let response = app
        .clone()
        .oneshot(post_json("/api/generate", json!({"topic": "Rust async", "async_mode": true})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "queued");
    assert!(body["started_at"].is_null());
    let job_id: uuid::Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

    harness.wait_for_terminal(job_id).await;

    let response = app.oneshot(get(&format!("/api/jobs/{job_id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress_updates"].as_array().unwrap().len(), 3);
    assert!(body["started_at"].is_string());
    assert!(body["completed_at"].is_string());
}

#[tokio::test]
async fn invalid_request_is_a_bad_request() {
    let harness = TestHarness::new(happy_stages());

    let response = app(&harness)
        .oneshot(post_json("/api/generate", json!({"topic": "   "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("invalid request"));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let harness = TestHarness::new(happy_stages());

    let response = app(&harness)
        .oneshot(get(&format!("/api/jobs/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancelling_a_finished_job_conflicts() {
    let harness = TestHarness::new(happy_stages());
    let job = harness.manager.submit(sync_request("rust")).await.unwrap();

    let response = app(&harness)
        .oneshot(post_json(&format!("/api/jobs/{}/cancel", job.id), json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn worker_endpoint_acknowledges_every_settled_delivery() {
    let harness = TestHarness::new(happy_stages());
    let app = app(&harness);
    let job = generation_core::kernel::jobs::Job::new(sync_request("rust"));
    {
        use generation_core::kernel::jobs::JobStore;
        harness.store.insert(&job).await.unwrap();
    }

    let first = app
        .clone()
        .oneshot(post_json("/internal/jobs/run", json!({"job_id": job.id})))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let body = json_body(first).await;
    assert_eq!(body["outcome"], "executed");
    assert_eq!(body["status"], "completed");

    let again = app
        .clone()
        .oneshot(post_json("/internal/jobs/run", json!({"job_id": job.id})))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(json_body(again).await["outcome"], "duplicate");

    let unknown = app
        .oneshot(post_json("/internal/jobs/run", json!({"job_id": uuid::Uuid::new_v4()})))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::OK);

    let stored = harness.manager.get_status(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

#[tokio::test]
async fn event_stream_replays_a_finished_job() {
    let harness = TestHarness::new(happy_stages());
    let job = harness.manager.submit(sync_request("rust")).await.unwrap();

    let response = app(&harness)
        .oneshot(get(&format!("/api/jobs/{}/events", job.id)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(text.matches(r#""type":"progress""#).count(), 3);
    assert_eq!(text.matches(r#""type":"terminal""#).count(), 1);
    assert!(text.find(r#""type":"terminal""#) > text.rfind(r#""type":"progress""#));
}

#[tokio::test]
async fn health_reports_the_memory_store() {
    let harness = TestHarness::new(happy_stages());

    let response = app(&harness).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["job_store"]["kind"], "memory");
}
