//! Orchestrator behaviour observed through progress and job state.

mod common;

use common::*;
use generation_core::domains::pipeline::{
    ContextSlot, Orchestrator, ProgressLog, ProgressPolicy, StageError, StageKind,
};
use generation_core::kernel::jobs::JobStatus;

#[tokio::test]
async fn stage_numbers_strictly_increase_with_constant_total() {
    let orchestrator = Orchestrator::new(happy_stages());
    let log = ProgressLog::new();

    orchestrator.run(sync_request("rust"), &log).await.unwrap();

    let updates = log.updates();
    assert_eq!(updates.len(), 3);
    for pair in updates.windows(2) {
        assert!(pair[1].stage_number > pair[0].stage_number);
        assert!(pair[1].progress_percentage >= pair[0].progress_percentage);
    }
    assert!(updates.iter().all(|u| u.total_stages == 3));
    assert_eq!(updates[0].stage_number, 1);
    assert_eq!(updates[2].progress_percentage, 100);
}

#[tokio::test]
async fn required_failure_aborts_and_later_stages_never_run() {
    let a = ScriptedStage::writes(ContextSlot::KeywordData, "keywords");
    let b = ScriptedStage::fails(StageError::Failed("model exploded".into()));
    let c = ScriptedStage::writes(ContextSlot::Draft, ARTICLE);
    let harness = TestHarness::new(vec![
        required(StageKind::KeywordAnalysis, &a),
        required(StageKind::StructurePlanning, &b),
        required(StageKind::DraftGeneration, &c),
    ]);

    let job = harness.manager.submit(sync_request("rust")).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_stage, Some(StageKind::StructurePlanning));
    assert_eq!(
        job.error_message.as_deref(),
        Some("stage structure_planning failed: model exploded")
    );
    assert_eq!(c.runs(), 0);
    assert!(job
        .progress_updates
        .iter()
        .all(|u| u.stage != StageKind::DraftGeneration));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn optional_failure_becomes_a_warning() {
    let a = ScriptedStage::writes(ContextSlot::KeywordData, "keywords");
    let b = ScriptedStage::fails(StageError::Unavailable("provider unavailable for serp_competitors".into()));
    let c = ScriptedStage::writes(ContextSlot::Draft, ARTICLE);
    let harness = TestHarness::new(vec![
        required(StageKind::KeywordAnalysis, &a),
        optional(StageKind::CompetitorAnalysis, &b),
        required(StageKind::DraftGeneration, &c),
    ]);

    let job = harness.manager.submit(sync_request("rust")).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job
        .warnings
        .iter()
        .any(|w| w.contains("competitor_analysis") && w.contains("serp_competitors")));
    assert_eq!(c.runs(), 1);

    let result = job.result.unwrap();
    assert_eq!(result["title"], "Scripted Article");
    assert!(result["content"].as_str().unwrap().contains("scripted stage"));
}

#[tokio::test]
async fn skipped_stages_are_left_out_of_the_total() {
    let skipped = ScriptedStage::skipped(ContextSlot::Images);
    let mut stages = happy_stages();
    stages.push(optional(StageKind::ImageGeneration, &skipped));
    let orchestrator = Orchestrator::new(stages);
    let log = ProgressLog::new();

    orchestrator.run(sync_request("rust"), &log).await.unwrap();

    let updates = log.updates();
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|u| u.total_stages == 3));
    assert!(updates.iter().all(|u| u.stage != StageKind::ImageGeneration));
    assert_eq!(skipped.runs(), 0);
}

#[tokio::test]
async fn stage_sequence_is_deterministic() {
    let orchestrator = Orchestrator::new(happy_stages()).with_policy(ProgressPolicy::Weighted);

    let mut sequences = Vec::new();
    for _ in 0..3 {
        let log = ProgressLog::new();
        orchestrator.run(sync_request("rust"), &log).await.unwrap();
        sequences.push(
            log.updates()
                .into_iter()
                .map(|u| (u.stage, u.stage_number, u.total_stages, u.progress_percentage))
                .collect::<Vec<_>>(),
        );
    }

    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(sequences[1], sequences[2]);
}

#[tokio::test]
async fn job_progress_matches_the_run() {
    let harness = TestHarness::new(happy_stages());

    let job = harness.manager.submit(sync_request("rust")).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percentage, 100);
    assert_eq!(job.current_stage, Some(StageKind::DraftGeneration));
    let numbers: Vec<u32> = job.progress_updates.iter().map(|u| u.stage_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(job.completed_at.is_some());
    assert!(job.estimated_time_remaining.is_none());
}
