//! Pipeline session management.
//!
//! The session manager is the single writer of [`PipelineState`]: it derives
//! the stage list, drives the parallel and sequential execution phases,
//! persists state after every transition, and produces the final report.
//! State is always replaced wholesale, so readers never observe a partially
//! updated record.

use crate::breaker::StageCircuitBreaker;
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::deps::DependencyResolver;
use crate::errors::OrchestratorError;
use crate::executor::{ExecutorContext, ExecutorRegistry};
use crate::parallel::{ParallelCoordinator, ParallelDisposition, ParallelExecutionResult};
use crate::report::{AnalysisReport, ReportGenerator};
use crate::retry::{RetryController, ABORTED_MESSAGE};
use crate::state::{
    AnalysisScope, AnalysisSession, PipelineState, PipelineStatistics, PipelineStatus, StageName,
    StageResult, StageStatus,
};
use crate::store::StateStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// What `execute` hands back on a run that was allowed to finish.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// True when every required stage succeeded.
    pub success: bool,
    /// The final persisted state.
    pub state: PipelineState,
    /// The generated report.
    pub report: AnalysisReport,
    /// Output locations of every stage that produced one.
    pub output_paths: HashMap<StageName, String>,
    /// Warnings accumulated during the run.
    pub warnings: Vec<String>,
}

/// Owns the active analysis session and orchestrates stage execution.
///
/// At most one session may be `running` per manager instance; a second
/// `start_analysis` while one runs fails fast rather than queuing.
#[derive(Debug)]
pub struct PipelineSessionManager {
    config: OrchestratorConfig,
    registry: ExecutorRegistry,
    retry: RetryController,
    coordinator: ParallelCoordinator,
    store: StateStore,
    current: Mutex<Option<AnalysisSession>>,
}

impl PipelineSessionManager {
    /// Creates a manager from a validated configuration and executor set.
    pub fn new(
        config: OrchestratorConfig,
        registry: ExecutorRegistry,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let breaker = Arc::new(StageCircuitBreaker::new(config.breaker.clone()));
        let retry = RetryController::new(
            config.retry.clone(),
            config.timeouts.clone(),
            Arc::clone(&breaker),
        );
        let coordinator = ParallelCoordinator::new(config.parallel.clone());
        let store = StateStore::new(config.scratchpad_dir.clone(), config.output_format);
        Ok(Self {
            config,
            registry,
            retry,
            coordinator,
            store,
            current: Mutex::new(None),
        })
    }

    /// A snapshot of the active session, if any.
    #[must_use]
    pub fn current_session(&self) -> Option<AnalysisSession> {
        self.current.lock().clone()
    }

    /// Creates a new analysis session.
    ///
    /// Fails with `InvalidProjectPath` when the project path is not an
    /// existing directory, and with `AnalysisInProgress` while another
    /// session is running. When no project id is supplied, one is derived
    /// from the directory name.
    pub async fn start_analysis(
        &self,
        project_path: impl AsRef<Path>,
        scope: AnalysisScope,
        generate_issues: bool,
        project_id: Option<String>,
    ) -> Result<AnalysisSession, OrchestratorError> {
        let path = project_path.as_ref();
        if !path.is_dir() {
            return Err(OrchestratorError::InvalidProjectPath {
                path: path.display().to_string(),
            });
        }

        let project_id = project_id.unwrap_or_else(|| {
            path.file_name().map_or_else(
                || path.display().to_string(),
                |name| name.to_string_lossy().into_owned(),
            )
        });
        let state = PipelineState::new(
            project_id,
            path.display().to_string(),
            scope,
            generate_issues,
        );
        let session = AnalysisSession::new(state);

        self.install_session(session.clone())?;
        if let Err(e) = self.store.save_state(&session.state).await {
            self.current.lock().take();
            return Err(e);
        }

        info!(
            analysis_id = %session.analysis_id,
            scope = %scope,
            generate_issues,
            "Analysis session started"
        );
        Ok(session)
    }

    /// Runs every pending stage of the active session.
    ///
    /// State is persisted on every status transition and again after final
    /// statistics; the report is generated and persisted even when the run
    /// failed. With `continue_on_error` disabled, a required-stage failure
    /// stops the run and raises `PipelineFailed` after persistence.
    pub async fn execute(&self) -> Result<ExecutionOutcome, OrchestratorError> {
        let mut state = {
            let current = self.current.lock();
            let session = current.as_ref().ok_or(OrchestratorError::NoActiveSession)?;
            if session.state.status == PipelineStatus::Running {
                return Err(OrchestratorError::AnalysisInProgress {
                    analysis_id: session.analysis_id.clone(),
                });
            }
            session.state.clone()
        };

        let run_started = Instant::now();
        state.status = PipelineStatus::Running;
        self.commit(&mut state).await?;

        let resolver = DependencyResolver::new(state.scope);
        let mut results: HashMap<StageName, StageResult> = HashMap::new();

        // Stages completed in a previous pass still satisfy dependencies.
        for stage in &state.stages {
            if stage.status == StageStatus::Completed {
                results.insert(
                    stage.name,
                    StageResult::success(stage.name, stage.output_path.clone(), 0, 0),
                );
            }
        }

        let pending = state.pending_stages();
        let (parallel_batch, sequential) =
            resolver.split_groups(&pending, self.config.parallel_execution);

        let mut halted = false;

        if !parallel_batch.is_empty() {
            for &stage in &parallel_batch {
                if let Some(record) = state.stage_mut(stage) {
                    record.mark_running();
                }
            }
            self.commit(&mut state).await?;

            let batch = self
                .run_parallel_batch(&state, &parallel_batch, &results)
                .await;

            for outcome in &batch.outcomes {
                let result = match (outcome.disposition, &outcome.result) {
                    (
                        ParallelDisposition::Fulfilled | ParallelDisposition::Rejected,
                        Some(result),
                    ) => result.clone(),
                    (ParallelDisposition::Timeout, _) => {
                        StageResult::failure(outcome.stage, "Stage timeout", 0, batch.duration_ms)
                    }
                    _ => StageResult::failure(outcome.stage, ABORTED_MESSAGE, 0, batch.duration_ms),
                };
                Self::apply_result(&mut state, &result);
                results.insert(result.stage, result);
            }
            self.commit(&mut state).await?;

            if !batch.can_continue {
                warn!(
                    fulfilled = batch.fulfilled_count,
                    total = batch.outcomes.len(),
                    "Parallel batch cannot continue, stopping run"
                );
                state.warnings.push(format!(
                    "Parallel batch: only {}/{} stages succeeded; remaining stages skipped",
                    batch.fulfilled_count,
                    batch.outcomes.len()
                ));
                halted = true;
            }
            if !self.config.continue_on_error && !state.failed_required_stages().is_empty() {
                halted = true;
            }
        }

        for &stage in &sequential {
            if halted {
                if let Some(record) = state.stage_mut(stage) {
                    record.mark_skipped("Skipped: pipeline stopped before this stage");
                }
                self.commit(&mut state).await?;
                continue;
            }

            if let Err(dep_err) = resolver.check(stage, &results) {
                // Recorded as failed without invoking the executor and
                // without consuming a retry.
                let result = StageResult::failure(stage, dep_err.to_string(), 0, 0);
                Self::apply_result(&mut state, &result);
                results.insert(stage, result);
                self.commit(&mut state).await?;
            } else {
                if let Some(record) = state.stage_mut(stage) {
                    record.mark_running();
                }
                self.commit(&mut state).await?;

                let result = self.run_stage(&state, stage, &results).await;
                Self::apply_result(&mut state, &result);
                results.insert(stage, result);
                self.commit(&mut state).await?;
            }

            let failed = state
                .stage(stage)
                .is_some_and(|s| s.status == StageStatus::Failed);
            if failed && stage.is_required() && !self.config.continue_on_error {
                halted = true;
            }
        }

        let duration_ms =
            u64::try_from(run_started.elapsed().as_millis()).unwrap_or(u64::MAX);
        state.statistics = PipelineStatistics::from_stages(&state.stages, duration_ms);
        let failed_required = state.failed_required_stages();
        state.status = if failed_required.is_empty() {
            PipelineStatus::Completed
        } else {
            PipelineStatus::Failed
        };
        self.commit(&mut state).await?;

        let report = ReportGenerator::new().generate(&state, &results);
        self.store.save_report(&state.analysis_id, &report).await?;

        info!(
            analysis_id = %state.analysis_id,
            status = %state.status,
            completed = state.statistics.completed_stages,
            failed = state.statistics.failed_stages,
            "Analysis run finished"
        );

        if !failed_required.is_empty() && !self.config.continue_on_error {
            return Err(OrchestratorError::PipelineFailed {
                failed_stages: failed_required
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            });
        }

        let output_paths = state
            .stages
            .iter()
            .filter_map(|s| s.output_path.clone().map(|p| (s.name, p)))
            .collect();
        Ok(ExecutionOutcome {
            success: failed_required.is_empty(),
            warnings: state.warnings.clone(),
            output_paths,
            report,
            state,
        })
    }

    /// Loads the persisted state for an analysis from a scratchpad root.
    pub async fn get_status(
        &self,
        analysis_id: &str,
        root: impl AsRef<Path>,
    ) -> Result<PipelineState, OrchestratorError> {
        StateStore::new(root.as_ref(), self.config.output_format)
            .load_state(analysis_id)
            .await
    }

    /// Reconstructs a session from persisted state.
    ///
    /// With `retry_failed`, every failed stage returns to pending with its
    /// error cleared and its retry count preserved; skipped stages return to
    /// pending as well, since they never actually ran. The loaded state is
    /// persisted back under `root`; subsequent execution persists under the
    /// configured scratchpad directory.
    pub async fn resume(
        &self,
        analysis_id: &str,
        root: impl AsRef<Path>,
        retry_failed: bool,
    ) -> Result<AnalysisSession, OrchestratorError> {
        let store = StateStore::new(root.as_ref(), self.config.output_format);
        let mut state = store.load_state(analysis_id).await?;
        if state.status == PipelineStatus::Running {
            return Err(OrchestratorError::AnalysisInProgress {
                analysis_id: analysis_id.to_string(),
            });
        }

        for stage in &mut state.stages {
            match stage.status {
                StageStatus::Failed | StageStatus::Skipped if retry_failed => {
                    stage.reset_for_retry();
                }
                _ => {}
            }
        }
        state.status = PipelineStatus::Pending;
        state.updated_at = Utc::now();

        let session = AnalysisSession::new(state);
        self.install_session(session.clone())?;
        if let Err(e) = store.save_state(&session.state).await {
            self.current.lock().take();
            return Err(e);
        }

        info!(
            analysis_id = %session.analysis_id,
            session_id = %session.session_id,
            retry_failed,
            "Analysis session resumed"
        );
        Ok(session)
    }

    fn install_session(&self, session: AnalysisSession) -> Result<(), OrchestratorError> {
        let mut current = self.current.lock();
        if let Some(existing) = current.as_ref() {
            if existing.state.status == PipelineStatus::Running {
                return Err(OrchestratorError::AnalysisInProgress {
                    analysis_id: existing.analysis_id.clone(),
                });
            }
        }
        *current = Some(session);
        Ok(())
    }

    async fn commit(&self, state: &mut PipelineState) -> Result<(), OrchestratorError> {
        state.updated_at = Utc::now();
        self.store.save_state(state).await?;

        let mut current = self.current.lock();
        if let Some(session) = current.as_mut() {
            if session.analysis_id == state.analysis_id {
                session.state = state.clone();
                session.updated_at = state.updated_at;
            }
        }
        Ok(())
    }

    async fn run_parallel_batch(
        &self,
        state: &PipelineState,
        batch: &[StageName],
        results: &HashMap<StageName, StageResult>,
    ) -> ParallelExecutionResult {
        let ctx = self.executor_context(state, results);
        self.coordinator
            .execute(batch, |stage, token| {
                let retry = self.retry.clone();
                let executor = self.registry.get(stage);
                let ctx = ctx.clone();
                async move {
                    let Some(executor) = executor else {
                        return StageResult::failure(
                            stage,
                            format!("No executor registered for stage {stage}"),
                            0,
                            0,
                        );
                    };
                    retry.run(stage, executor, &ctx, token.as_ref()).await
                }
            })
            .await
    }

    async fn run_stage(
        &self,
        state: &PipelineState,
        stage: StageName,
        results: &HashMap<StageName, StageResult>,
    ) -> StageResult {
        let Some(executor) = self.registry.get(stage) else {
            return StageResult::failure(
                stage,
                format!("No executor registered for stage {stage}"),
                0,
                0,
            );
        };
        let ctx = self.executor_context(state, results);
        let token = CancellationToken::new();
        self.retry.run(stage, executor, &ctx, &token).await
    }

    fn executor_context(
        &self,
        state: &PipelineState,
        results: &HashMap<StageName, StageResult>,
    ) -> ExecutorContext {
        let upstream = results
            .iter()
            .filter(|(_, r)| r.success)
            .filter_map(|(stage, r)| r.output_path.clone().map(|p| (*stage, p)))
            .collect();
        ExecutorContext::new(state.project_path.clone(), state.project_id.clone())
            .with_upstream_outputs(upstream)
    }

    fn apply_result(state: &mut PipelineState, result: &StageResult) {
        let mut error_entry = None;
        if let Some(record) = state.stage_mut(result.stage) {
            record.retry_count += result.retry_count;
            if result.success {
                record.mark_completed(result.output_path.clone());
            } else {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                record.mark_failed(message.clone());
                error_entry = Some(format!("{}: {message}", result.stage));
            }
        }
        if let Some(entry) = error_entry {
            state.errors.push(entry);
        }
        if !result.success && !result.stage.is_required() {
            state
                .warnings
                .push(format!("Optional stage {} failed", result.stage));
        }
    }
}
