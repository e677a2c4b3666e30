//! End-to-end orchestration tests over mock executors.

use crate::config::OrchestratorConfig;
use crate::errors::OrchestratorError;
use crate::executor::ExecutorRegistry;
use crate::report::OverallStatus;
use crate::retry::RetryConfig;
use crate::session::PipelineSessionManager;
use crate::state::{AnalysisScope, PipelineStatus, StageName, StageStatus};
use crate::testing::{FailingExecutor, FlakyExecutor, MockExecutor};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tokio_test::assert_ok;
use std::sync::Arc;
use std::time::Duration;

fn project_dir(root: &Path) -> PathBuf {
    let project = root.join("proj");
    std::fs::create_dir_all(&project).unwrap();
    project
}

fn fast_config(scratch: &Path) -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_scratchpad_dir(scratch)
        .with_retry(RetryConfig::new().with_max_retries(0).with_base_delay_ms(1))
}

fn all_succeeding_registry() -> ExecutorRegistry {
    ExecutorRegistry::new()
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::DocumentReader,
            "inventory/docs.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::CodeReader,
            "inventory/code.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::Comparator,
            "comparison/gaps.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::IssueGenerator,
            "issues/created.json",
        )))
}

#[tokio::test]
async fn test_full_pipeline_completes_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let manager =
        PipelineSessionManager::new(fast_config(dir.path()), all_succeeding_registry()).unwrap();

    let session = manager
        .start_analysis(&project, AnalysisScope::Full, true, Some("proj".to_string()))
        .await
        .unwrap();
    assert_eq!(session.state.stages.len(), 4);

    let outcome = manager.execute().await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.state.status, PipelineStatus::Completed);
    assert_eq!(outcome.report.overall_status, OverallStatus::Success);
    assert_eq!(outcome.state.statistics.completed_stages, 4);
    assert_eq!(outcome.state.statistics.failed_stages, 0);
    assert_eq!(
        outcome.output_paths.get(&StageName::Comparator).map(String::as_str),
        Some("comparison/gaps.json")
    );

    // Persisted state equals the in-memory state at persistence time.
    let loaded = manager
        .get_status(&outcome.state.analysis_id, dir.path())
        .await
        .unwrap();
    assert_eq!(loaded.statistics, outcome.state.statistics);
    assert_eq!(loaded.status, outcome.state.status);
    for (loaded_stage, final_stage) in loaded.stages.iter().zip(outcome.state.stages.iter()) {
        assert_eq!(loaded_stage.status, final_stage.status);
    }
}

#[tokio::test]
async fn test_failed_reader_blocks_comparator() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let registry = ExecutorRegistry::new()
        .with_executor(Arc::new(FailingExecutor::new(
            StageName::DocumentReader,
            "documents unreadable",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::CodeReader,
            "inventory/code.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::Comparator,
            "comparison/gaps.json",
        )));
    let manager = PipelineSessionManager::new(fast_config(dir.path()), registry).unwrap();

    manager
        .start_analysis(&project, AnalysisScope::Full, false, None)
        .await
        .unwrap();
    let outcome = manager.execute().await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.state.status, PipelineStatus::Failed);

    // One of two readers succeeded: the default policy lets the run continue
    // to the sequential phase, where the comparator is dependency-blocked
    // without being invoked.
    let comparator = outcome.state.stage(StageName::Comparator).unwrap();
    assert_eq!(comparator.status, StageStatus::Failed);
    let error = comparator.error.as_deref().unwrap();
    assert!(error.contains("blocked"));
    assert!(error.contains("document_reader"));

    let code = outcome.state.stage(StageName::CodeReader).unwrap();
    assert_eq!(code.status, StageStatus::Completed);

    // Failed-stage remediation leads the recommendations.
    assert_eq!(outcome.report.recommendations[0].priority, 1);
}

#[tokio::test]
async fn test_documents_only_succeeds_alone() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let registry = ExecutorRegistry::new().with_executor(Arc::new(MockExecutor::succeeding(
        StageName::DocumentReader,
        "inventory/docs.json",
    )));
    let manager = PipelineSessionManager::new(fast_config(dir.path()), registry).unwrap();

    manager
        .start_analysis(&project, AnalysisScope::DocumentsOnly, false, None)
        .await
        .unwrap();
    let outcome = tokio_test::assert_ok!(manager.execute().await);

    assert!(outcome.success);
    assert_eq!(outcome.report.overall_status, OverallStatus::Success);
    assert_eq!(outcome.state.stages.len(), 1);
}

#[tokio::test]
async fn test_pipeline_failed_raised_without_continue_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let registry = ExecutorRegistry::new()
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::DocumentReader,
            "inventory/docs.json",
        )))
        .with_executor(Arc::new(FailingExecutor::new(
            StageName::CodeReader,
            "source tree missing",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::Comparator,
            "comparison/gaps.json",
        )));
    let config = fast_config(dir.path()).with_continue_on_error(false);
    let manager = PipelineSessionManager::new(config, registry).unwrap();

    let session = manager
        .start_analysis(&project, AnalysisScope::Full, false, None)
        .await
        .unwrap();
    let err = manager.execute().await.unwrap_err();

    match err {
        OrchestratorError::PipelineFailed { failed_stages } => {
            assert_eq!(failed_stages, vec!["code_reader".to_string()]);
        }
        other => panic!("expected PipelineFailed, got {other}"),
    }

    // State was persisted before the error was raised: the run stays
    // queryable, with the never-attempted comparator marked skipped.
    let loaded = manager
        .get_status(&session.analysis_id, dir.path())
        .await
        .unwrap();
    assert_eq!(loaded.status, PipelineStatus::Failed);
    assert_eq!(
        loaded.stage(StageName::Comparator).unwrap().status,
        StageStatus::Skipped
    );
}

#[tokio::test]
async fn test_resume_retries_failed_stage_and_preserves_completed() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    // Two failures, then success: with one retry per pass the first pass
    // fails (attempts 1 and 2) and the resumed pass succeeds (attempt 3).
    let registry = ExecutorRegistry::new()
        .with_executor(Arc::new(FlakyExecutor::new(
            StageName::DocumentReader,
            2,
            "inventory/docs.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::CodeReader,
            "inventory/code.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::Comparator,
            "comparison/gaps.json",
        )));
    let config = fast_config(dir.path())
        .with_retry(RetryConfig::new().with_max_retries(1).with_base_delay_ms(1));
    let manager = PipelineSessionManager::new(config, registry).unwrap();

    let session = manager
        .start_analysis(&project, AnalysisScope::Full, false, None)
        .await
        .unwrap();
    let analysis_id = session.analysis_id.clone();

    let first = manager.execute().await.unwrap();
    assert!(!first.success);
    let doc = first.state.stage(StageName::DocumentReader).unwrap();
    assert_eq!(doc.status, StageStatus::Failed);
    assert_eq!(doc.retry_count, 1);

    let resumed = manager.resume(&analysis_id, dir.path(), true).await.unwrap();
    let doc = resumed.state.stage(StageName::DocumentReader).unwrap();
    assert_eq!(doc.status, StageStatus::Pending);
    assert!(doc.error.is_none());
    // Retry count from the first pass is preserved on the reset stage.
    assert_eq!(doc.retry_count, 1);
    // The completed reader is untouched.
    let code = resumed.state.stage(StageName::CodeReader).unwrap();
    assert_eq!(code.status, StageStatus::Completed);
    assert_eq!(code.output_path.as_deref(), Some("inventory/code.json"));

    let second = manager.execute().await.unwrap();
    assert!(second.success);
    assert_eq!(second.state.status, PipelineStatus::Completed);
    let doc = second.state.stage(StageName::DocumentReader).unwrap();
    assert_eq!(doc.status, StageStatus::Completed);
    assert_eq!(doc.retry_count, 1);
}

#[tokio::test]
async fn test_resume_rejects_running_state() {
    let dir = tempfile::tempdir().unwrap();
    let manager =
        PipelineSessionManager::new(fast_config(dir.path()), all_succeeding_registry()).unwrap();

    // A crashed process leaves a running state behind; a second orchestrator
    // must not resume it while it claims to be live.
    let mut state =
        crate::state::PipelineState::new("proj", "/tmp/proj", AnalysisScope::Full, false);
    state.status = PipelineStatus::Running;
    let store = crate::store::StateStore::new(dir.path(), crate::config::OutputFormat::Json);
    store.save_state(&state).await.unwrap();

    let err = manager
        .resume(&state.analysis_id, dir.path(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AnalysisInProgress { .. }));
}

#[tokio::test]
async fn test_resume_unknown_analysis_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let manager =
        PipelineSessionManager::new(fast_config(dir.path()), all_succeeding_registry()).unwrap();

    let err = manager.resume("missing-id", dir.path(), true).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AnalysisNotFound { .. }));
}

#[tokio::test]
async fn test_start_while_running_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let registry = ExecutorRegistry::new().with_executor(Arc::new(
        MockExecutor::succeeding(StageName::DocumentReader, "inventory/docs.json")
            .with_delay(Duration::from_millis(500)),
    ));
    let manager =
        Arc::new(PipelineSessionManager::new(fast_config(dir.path()), registry).unwrap());

    manager
        .start_analysis(&project, AnalysisScope::DocumentsOnly, false, None)
        .await
        .unwrap();

    let runner = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.execute().await })
    };
    // Let execute mark the session running before the competing start.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = manager
        .start_analysis(&project, AnalysisScope::DocumentsOnly, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AnalysisInProgress { .. }));

    let outcome = runner.await.unwrap().unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn test_optional_issue_generator_failure_keeps_success() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let registry = ExecutorRegistry::new()
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::DocumentReader,
            "inventory/docs.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::CodeReader,
            "inventory/code.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::Comparator,
            "comparison/gaps.json",
        )))
        .with_executor(Arc::new(FailingExecutor::new(
            StageName::IssueGenerator,
            "tracker unreachable",
        )));
    let manager = PipelineSessionManager::new(fast_config(dir.path()), registry).unwrap();

    manager
        .start_analysis(&project, AnalysisScope::Full, true, None)
        .await
        .unwrap();
    let outcome = manager.execute().await.unwrap();

    // The generator is not required; its failure degrades, not fails, the run.
    assert!(outcome.success);
    assert_eq!(outcome.state.status, PipelineStatus::Completed);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("issue_generator")));
    assert_eq!(
        outcome.state.stage(StageName::IssueGenerator).unwrap().status,
        StageStatus::Failed
    );
}

#[tokio::test]
async fn test_sequential_mode_runs_readers_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let config = fast_config(dir.path()).with_parallel_execution(false);
    let manager = PipelineSessionManager::new(config, all_succeeding_registry()).unwrap();

    manager
        .start_analysis(&project, AnalysisScope::Comparison, false, None)
        .await
        .unwrap();
    let outcome = manager.execute().await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.state.statistics.completed_stages, 3);
}

#[tokio::test]
async fn test_comparator_receives_upstream_outputs() {
    use crate::executor::{ExecutorContext, ExecutorOutput, StageExecutor};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingComparator {
        upstream: Mutex<Option<Vec<String>>>,
    }

    #[async_trait]
    impl StageExecutor for RecordingComparator {
        fn stage(&self) -> StageName {
            StageName::Comparator
        }

        async fn execute(&self, ctx: &ExecutorContext) -> anyhow::Result<ExecutorOutput> {
            let mut seen: Vec<String> = ctx.upstream_outputs.values().cloned().collect();
            seen.sort();
            *self.upstream.lock() = Some(seen);
            Ok(ExecutorOutput::at("comparison/gaps.json"))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let project = project_dir(dir.path());
    let comparator = Arc::new(RecordingComparator::default());
    let registry = ExecutorRegistry::new()
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::DocumentReader,
            "inventory/docs.json",
        )))
        .with_executor(Arc::new(MockExecutor::succeeding(
            StageName::CodeReader,
            "inventory/code.json",
        )))
        .with_executor(comparator.clone());
    let manager = PipelineSessionManager::new(fast_config(dir.path()), registry).unwrap();

    manager
        .start_analysis(&project, AnalysisScope::Full, false, None)
        .await
        .unwrap();
    manager.execute().await.unwrap();

    let seen = comparator.upstream.lock().clone().unwrap();
    assert_eq!(
        seen,
        vec![
            "inventory/code.json".to_string(),
            "inventory/docs.json".to_string(),
        ]
    );
}
