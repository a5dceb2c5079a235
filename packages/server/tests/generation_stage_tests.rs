//! The deployed ten-stage pipeline against scripted providers.

mod common;

use std::sync::Arc;

use common::*;
use generation_core::domains::generation::{default_pipeline, GeneratedContent, PipelineSettings};
use generation_core::domains::pipeline::StageKind;
use generation_core::kernel::jobs::JobStatus;
use generation_core::kernel::{BaseContentProvider, MockContentProvider, ProgressHub, ServerDeps};
use provider_gateway::{
    CacheTtlTable, Gateway, MockReply, MockTransport, OperationRegistry, ResponseCache,
    RetryPolicy,
};
use serde_json::json;

const KEYWORD_OVERVIEW: &str = "/v3/dataforseo_labs/google/keyword_overview/live";
const KEYWORD_OVERVIEW_LEGACY: &str = "/v3/dataforseo_labs/keyword_overview/live";
const SERP_ORGANIC: &str = "/v3/serp/google/organic/live/advanced";

fn deps(
    transport: Arc<MockTransport>,
    primary: Arc<MockContentProvider>,
    secondary: Option<Arc<MockContentProvider>>,
) -> ServerDeps {
    let gateway = Gateway::new(
        transport,
        ResponseCache::in_memory(CacheTtlTable::default()),
        OperationRegistry::seo_defaults(),
    )
    .with_retry_policy(RetryPolicy::immediate(1));

    ServerDeps::new(
        Arc::new(gateway),
        primary,
        secondary.map(|p| p as Arc<dyn BaseContentProvider>),
        ProgressHub::new(),
    )
}

fn harness(deps: &ServerDeps) -> TestHarness {
    TestHarness::with_orchestrator(
        default_pipeline(deps, &PipelineSettings::default()),
        HarnessOptions::default(),
    )
}

/// Provider body with `items` where the task result list puts them.
fn task_items(items: serde_json::Value) -> MockReply {
    MockReply::Respond {
        status: 200,
        body: json!({ "tasks": [{ "status_code": 20000, "result": [{ "items": items }] }] }),
    }
}

#[tokio::test]
async fn pipeline_completes_on_empty_provider_data() {
    let transport = Arc::new(MockTransport::new());
    let primary = Arc::new(MockContentProvider::new("primary"));
    let deps = deps(transport.clone(), primary.clone(), None);
    let harness = harness(&deps);

    let job = harness.manager.submit(sync_request("rust async")).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    // Images are off by default.
    assert_eq!(job.progress_updates.len(), 9);
    assert!(job.progress_updates.iter().all(|u| u.total_stages == 9));
    assert_eq!(primary.call_count(), 5);

    let content: GeneratedContent = serde_json::from_value(job.result.unwrap()).unwrap();
    assert_eq!(content.title, "Mock Title");
    assert!(content.word_count > 0);
    assert_eq!(content.keywords, vec!["rust", "async"]);
    assert!(content.providers_used.contains(&"primary".to_string()));
    assert!(content
        .warnings
        .iter()
        .any(|w| w.contains("no sources available for citations")));
    assert!(content.totals.total_tokens >= 500);
}

#[tokio::test]
async fn denied_keyword_lookup_fails_the_job_with_a_clear_reason() {
    let transport = Arc::new(MockTransport::new().with_default(KEYWORD_OVERVIEW, MockReply::denied()));
    let primary = Arc::new(MockContentProvider::new("primary"));
    let deps = deps(transport.clone(), primary.clone(), None);
    let harness = harness(&deps);

    let job = harness.manager.submit(sync_request("rust async")).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_stage, Some(StageKind::KeywordAnalysis));
    let message = job.error_message.unwrap();
    assert!(message.starts_with("stage keyword_analysis failed"), "{message}");
    assert!(message.contains("access denied for keyword_overview"), "{message}");
    assert_eq!(transport.calls_to(KEYWORD_OVERVIEW_LEGACY), 0);
    assert_eq!(primary.call_count(), 0);
}

#[tokio::test]
async fn failing_primary_falls_back_to_secondary() {
    let transport = Arc::new(MockTransport::new());
    let primary = Arc::new(MockContentProvider::new("primary").failing("rate limited"));
    let secondary = Arc::new(MockContentProvider::new("secondary"));
    let deps = deps(transport, primary.clone(), Some(secondary.clone()));
    let harness = harness(&deps);

    let job = harness.manager.submit(sync_request("rust async")).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    assert_eq!(primary.call_count(), 5);
    assert_eq!(secondary.call_count(), 5);

    let content: GeneratedContent = serde_json::from_value(job.result.unwrap()).unwrap();
    assert!(content.providers_used.contains(&"secondary".to_string()));
    assert!(!content.providers_used.contains(&"primary".to_string()));
    assert!(content
        .warnings
        .iter()
        .any(|w| w.contains("used fallback provider secondary")));
}

#[tokio::test]
async fn rejected_enhancement_keeps_the_draft() {
    let transport = Arc::new(MockTransport::new());
    let primary = Arc::new(
        MockContentProvider::new("primary")
            .with_response(generation_core::kernel::MOCK_CONTENT)
            .with_response(generation_core::kernel::MOCK_CONTENT)
            .with_response(generation_core::kernel::MOCK_CONTENT)
            .with_response(""),
    );
    let deps = deps(transport, primary, None);
    let harness = harness(&deps);

    let job = harness.manager.submit(sync_request("rust async")).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    assert!(job
        .warnings
        .iter()
        .any(|w| w.starts_with("enhancement skipped after failure")));
    let content: GeneratedContent = serde_json::from_value(job.result.unwrap()).unwrap();
    assert_eq!(content.title, "Mock Title");
}

#[tokio::test]
async fn research_sources_become_citations() {
    let transport = Arc::new(MockTransport::new().with_default(
        SERP_ORGANIC,
        task_items(json!([
            {"type": "organic", "title": "Async Rust", "url": "https://example.com/async", "description": "Futures explained"},
            {"type": "organic", "title": "Tokio", "url": "https://tokio.rs", "description": "Runtime"},
            {"type": "organic", "title": "Async Rust again", "url": "https://example.com/async"},
            {"type": "people_also_ask", "title": "What is async?"}
        ])),
    ));
    let primary = Arc::new(MockContentProvider::new("primary"));
    let deps = deps(transport, primary.clone(), None);
    let harness = harness(&deps);

    let job = harness.manager.submit(sync_request("rust async")).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
    let content: GeneratedContent = serde_json::from_value(job.result.unwrap()).unwrap();
    let urls: Vec<&str> = content
        .citations
        .iter()
        .filter_map(|c| c["url"].as_str())
        .collect();
    assert_eq!(urls, vec!["https://example.com/async", "https://tokio.rs"]);
    assert!(primary.was_called_with("https://tokio.rs"));
}
