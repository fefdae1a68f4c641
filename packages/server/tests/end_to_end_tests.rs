//! End-to-end tests: submit through the queue, run on a worker with the real
//! generation pipelines and mock collaborators, read the stored result.

mod common;

use std::path::Path;
use std::time::Duration;

use docsmith_core::domains::generation::GenerationResult;
use docsmith_core::kernel::jobs::{JobStatus, JobType};
use docsmith_core::kernel::test_dependencies::{MockConverter, TestDependencies};
use docsmith_core::kernel::TargetFormat;
use serde_json::json;
use test_context::test_context;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::common::{fast_worker_config, research_params, wait_for_status, TestHarness};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Run one job on a worker until it completes, returning its parsed result.
async fn generate(
    ctx: &TestHarness,
    test_deps: TestDependencies,
    job_type: JobType,
    params: serde_json::Value,
) -> (Uuid, GenerationResult) {
    let registry = ctx.generation_registry(test_deps.into_server_deps());
    let shutdown = CancellationToken::new();
    let worker = ctx.worker(registry, fast_worker_config("w-e2e"));
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let job_id = ctx
        .queue
        .submit_job(Uuid::new_v4(), job_type, params)
        .await
        .unwrap();
    let job = wait_for_status(&ctx.queue, job_id, JobStatus::Completed, TIMEOUT).await;

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let result = serde_json::from_value(job.result.clone().expect("completed job has a result"))
        .expect("result is a GenerationResult");
    (job_id, result)
}

#[test_context(TestHarness)]
#[tokio::test]
async fn research_pack_runs_from_submission_to_completion(ctx: &TestHarness) {
    let test_deps = TestDependencies::new();
    let (job_id, result) = generate(
        ctx,
        test_deps.clone(),
        JobType::ResearchPack,
        research_params("X"),
    )
    .await;

    // Progress only ever moves forward and ends at 100
    let history = ctx.store.progress_history(job_id).await;
    assert!(!history.is_empty());
    assert!(history.windows(2).all(|w| w[0] <= w[1]), "{:?}", history);
    assert_eq!(history.last(), Some(&100.0));

    assert_eq!(result.title, "Research Pack: X");
    assert_eq!(result.sections.len(), 5);
    assert!(result
        .document
        .sections
        .iter()
        .all(|s| !s.content.trim().is_empty()));
    assert_eq!(result.document.sources.len(), 1);
    assert!(result.warnings.is_empty());

    let primary = result.primary_artifact().unwrap();
    assert_eq!(primary.format, TargetFormat::Markdown);
    let markdown = std::fs::read_to_string(&primary.local_path).unwrap();
    assert!(markdown.starts_with("# Research Pack: X"));
    assert!(markdown.contains("## Key Concepts"));

    let job = ctx.queue.get_job_status(job_id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 0);
    assert!(job.error_message.is_none());
    assert_eq!(test_deps.search_service.calls(), vec![("X".to_string(), 5)]);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn review_paper_uses_its_own_layout(ctx: &TestHarness) {
    let (_, result) = generate(
        ctx,
        TestDependencies::new(),
        JobType::ReviewPaper,
        json!({"topic": "Sleep", "audience": "clinicians", "citation_style": "chicago"}),
    )
    .await;

    assert_eq!(
        result.sections,
        vec!["Abstract", "Introduction", "Literature Review", "Discussion", "Conclusion"]
    );
    assert_eq!(result.document.audience.as_deref(), Some("clinicians"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn converter_failure_keeps_only_the_primary_artifact(ctx: &TestHarness) {
    let test_deps = TestDependencies::new().mock_converter(MockConverter::failing());
    let (_, result) = generate(ctx, test_deps.clone(), JobType::ResearchPack, research_params("X")).await;

    assert_eq!(result.artifacts.len(), 1);
    let primary = &result.artifacts[0];
    assert_eq!(primary.format, TargetFormat::Markdown);
    assert!(Path::new(&primary.local_path).exists());
    assert!(primary.url.is_some());
    assert!(result.warnings.iter().any(|w| w.starts_with("conversion failed")));
    assert_eq!(test_deps.converter.calls().len(), 1);
}
