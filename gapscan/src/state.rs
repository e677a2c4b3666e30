//! Durable pipeline state: stage identities, statuses, sessions, and results.
//!
//! [`PipelineState`] is the record persisted after every status transition;
//! everything in this module serializes with snake_case keys so the on-disk
//! shape matches the documented state layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The four fixed analysis stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Inventories project documentation.
    DocumentReader,
    /// Inventories project code.
    CodeReader,
    /// Compares the two inventories and surfaces gaps.
    Comparator,
    /// Turns comparison gaps into tracked issues.
    IssueGenerator,
}

impl StageName {
    /// Returns the stage's wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentReader => "document_reader",
            Self::CodeReader => "code_reader",
            Self::Comparator => "comparator",
            Self::IssueGenerator => "issue_generator",
        }
    }

    /// Returns true if a failure of this stage blocks overall success.
    ///
    /// Only `issue_generator` is optional; every other stage that appears in
    /// a scope's stage list is required.
    #[must_use]
    pub fn is_required(&self) -> bool {
        !matches!(self, Self::IssueGenerator)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of stages an analysis run intends to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisScope {
    /// Readers, comparator, and (if requested) issue generation.
    Full,
    /// Document inventory only.
    DocumentsOnly,
    /// Code inventory only.
    CodeOnly,
    /// Same stage set as full; kept distinct for reporting.
    Comparison,
}

impl AnalysisScope {
    /// Derives the ordered stage list for this scope.
    ///
    /// `issue_generator` is included only when issue generation was requested
    /// and the scope runs the comparator.
    #[must_use]
    pub fn stages(&self, generate_issues: bool) -> Vec<StageName> {
        match self {
            Self::Full | Self::Comparison => {
                let mut stages = vec![
                    StageName::DocumentReader,
                    StageName::CodeReader,
                    StageName::Comparator,
                ];
                if generate_issues {
                    stages.push(StageName::IssueGenerator);
                }
                stages
            }
            Self::DocumentsOnly => vec![StageName::DocumentReader],
            Self::CodeOnly => vec![StageName::CodeReader],
        }
    }

    /// Returns true if this scope runs the comparator and can generate issues.
    #[must_use]
    pub fn supports_issue_generation(&self) -> bool {
        matches!(self, Self::Full | Self::Comparison)
    }
}

impl fmt::Display for AnalysisScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::DocumentsOnly => write!(f, "documents_only"),
            Self::CodeOnly => write!(f, "code_only"),
            Self::Comparison => write!(f, "comparison"),
        }
    }
}

/// The overall status of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Created but not yet executed.
    Pending,
    /// Execution in flight.
    Running,
    /// Every required stage succeeded.
    Completed,
    /// At least one required stage failed.
    Failed,
}

impl PipelineStatus {
    /// Returns true if the run has ended.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The execution status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet attempted in this pass.
    Pending,
    /// Attempt in flight.
    Running,
    /// Attempt succeeded.
    Completed,
    /// Attempt failed (execution error, timeout, abort, or blocked dependency).
    Failed,
    /// Never attempted because the run stopped first.
    Skipped,
}

impl StageStatus {
    /// Returns true if the stage reached a terminal state for this pass.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One unit of pipeline work inside [`PipelineState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    /// The stage identity.
    pub name: StageName,
    /// Current status.
    pub status: StageStatus,
    /// When the most recent attempt started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Location of the stage's output, when it produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Error message when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retries consumed across all execution passes.
    #[serde(default)]
    pub retry_count: u32,
}

impl PipelineStage {
    /// Creates a new pending stage.
    #[must_use]
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            output_path: None,
            error: None,
            retry_count: 0,
        }
    }

    /// Marks the stage as running.
    pub fn mark_running(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the stage as completed with an optional output location.
    pub fn mark_completed(&mut self, output_path: Option<String>) {
        self.status = StageStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.output_path = output_path;
        self.error = None;
    }

    /// Marks the stage as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StageStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Marks the stage as skipped.
    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = StageStatus::Skipped;
        self.completed_at = Some(Utc::now());
        self.error = Some(reason.into());
    }

    /// Resets the stage to pending for another pass, clearing its error while
    /// preserving the accumulated retry count.
    pub fn reset_for_retry(&mut self) {
        self.status = StageStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
    }
}

/// Aggregate statistics over a run's stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatistics {
    /// Number of stages in the run.
    pub total_stages: usize,
    /// Stages that completed.
    pub completed_stages: usize,
    /// Stages that failed.
    pub failed_stages: usize,
    /// Stages that were skipped.
    pub skipped_stages: usize,
    /// Retries consumed across every stage.
    pub total_retries: u32,
    /// Wall-clock duration of the run in milliseconds.
    pub total_duration_ms: u64,
}

impl PipelineStatistics {
    /// Derives statistics from a stage list and the run's wall-clock duration.
    #[must_use]
    pub fn from_stages(stages: &[PipelineStage], total_duration_ms: u64) -> Self {
        Self {
            total_stages: stages.len(),
            completed_stages: stages
                .iter()
                .filter(|s| s.status == StageStatus::Completed)
                .count(),
            failed_stages: stages
                .iter()
                .filter(|s| s.status == StageStatus::Failed)
                .count(),
            skipped_stages: stages
                .iter()
                .filter(|s| s.status == StageStatus::Skipped)
                .count(),
            total_retries: stages.iter().map(|s| s.retry_count).sum(),
            total_duration_ms,
        }
    }
}

/// The durable record of one analysis run.
///
/// The stage list is fixed once created for a given scope; only per-stage
/// status, output, error, and retry counts mutate afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique id of this analysis run.
    pub analysis_id: String,
    /// Caller-supplied or derived project identifier.
    pub project_id: String,
    /// Path of the project under analysis.
    pub project_path: String,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
    /// Overall run status.
    pub status: PipelineStatus,
    /// The scope the run was created with.
    pub scope: AnalysisScope,
    /// Whether issue generation was requested.
    pub generate_issues: bool,
    /// Ordered stage records.
    pub stages: Vec<PipelineStage>,
    /// Aggregate statistics, populated when execution finishes.
    #[serde(default)]
    pub statistics: PipelineStatistics,
    /// Non-fatal degradations observed during execution.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Stage error messages, in the order they occurred.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PipelineState {
    /// Creates a new pending state with the stage list derived from scope.
    #[must_use]
    pub fn new(
        project_id: impl Into<String>,
        project_path: impl Into<String>,
        scope: AnalysisScope,
        generate_issues: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            analysis_id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            project_path: project_path.into(),
            started_at: now,
            updated_at: now,
            status: PipelineStatus::Pending,
            scope,
            generate_issues,
            stages: scope
                .stages(generate_issues)
                .into_iter()
                .map(PipelineStage::new)
                .collect(),
            statistics: PipelineStatistics::default(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Returns the stage record for a name, if the scope includes it.
    #[must_use]
    pub fn stage(&self, name: StageName) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Returns a mutable stage record for a name.
    pub fn stage_mut(&mut self, name: StageName) -> Option<&mut PipelineStage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Names of stages whose failure blocks overall success.
    #[must_use]
    pub fn required_stages(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .map(|s| s.name)
            .filter(StageName::is_required)
            .collect()
    }

    /// Required stages that ended failed.
    #[must_use]
    pub fn failed_required_stages(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .filter(|s| s.name.is_required() && s.status == StageStatus::Failed)
            .map(|s| s.name)
            .collect()
    }

    /// Stages still pending execution, in scope order.
    #[must_use]
    pub fn pending_stages(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Pending)
            .map(|s| s.name)
            .collect()
    }
}

/// Outcome of one stage attempt, produced by every invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage that was attempted.
    pub stage: StageName,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// Location of the stage's output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the attempt(s) in milliseconds.
    pub duration_ms: u64,
    /// Retries consumed by this invocation.
    pub retry_count: u32,
}

impl StageResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(
        stage: StageName,
        output_path: Option<String>,
        retry_count: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            stage,
            success: true,
            output_path,
            error: None,
            duration_ms,
            retry_count,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(
        stage: StageName,
        error: impl Into<String>,
        retry_count: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            stage,
            success: false,
            output_path: None,
            error: Some(error.into()),
            duration_ms,
            retry_count,
        }
    }
}

/// The live handle for the currently active run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    /// Unique id of this session.
    pub session_id: String,
    /// The analysis the session drives.
    pub analysis_id: String,
    /// Current pipeline state.
    pub state: PipelineState,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session last observed a state change.
    pub updated_at: DateTime<Utc>,
}

impl AnalysisSession {
    /// Creates a fresh session around a pipeline state.
    #[must_use]
    pub fn new(state: PipelineState) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            analysis_id: state.analysis_id.clone(),
            state,
            created_at: now,
            updated_at: now,
        }
    }
}
