//! Error types for the gapscan orchestration engine.
//!
//! Stage-level failures are recovered into [`crate::state::StageResult`]s and
//! never surface through this module; the errors here are the ones callers of
//! the session manager can observe.

use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// An analysis session is already running on this orchestrator instance.
    #[error("Analysis already in progress: {analysis_id}")]
    AnalysisInProgress {
        /// The analysis that is currently running.
        analysis_id: String,
    },

    /// The project path does not exist or is not a directory.
    #[error("Invalid project path: {path}")]
    InvalidProjectPath {
        /// The offending path.
        path: String,
    },

    /// No analysis session is active on this orchestrator instance.
    #[error("No active analysis session")]
    NoActiveSession,

    /// A stage failed after exhausting its retries.
    #[error("Stage {stage} failed: {message}")]
    StageExecution {
        /// The failing stage.
        stage: String,
        /// The last error observed.
        message: String,
    },

    /// A stage exceeded its time budget.
    #[error("Stage {stage} timed out after {timeout_ms}ms")]
    StageTimeout {
        /// The stage that timed out.
        stage: String,
        /// The configured budget in milliseconds.
        timeout_ms: u64,
    },

    /// The circuit breaker rejected the attempt.
    #[error("Circuit breaker open for stage {stage}")]
    CircuitOpen {
        /// The gated stage.
        stage: String,
    },

    /// An upstream dependency of a stage failed.
    #[error("{0}")]
    StageDependency(#[from] StageDependencyError),

    /// Persisting state or report output failed.
    #[error("Failed to write {path}: {message}")]
    OutputWrite {
        /// The target path.
        path: String,
        /// The underlying IO or serialization error.
        message: String,
    },

    /// Persisted state exists but could not be parsed.
    #[error("Failed to read state for analysis {analysis_id}: {message}")]
    StateRead {
        /// The analysis whose state was requested.
        analysis_id: String,
        /// The underlying IO or parse error.
        message: String,
    },

    /// No persisted state exists for the analysis id.
    #[error("Analysis not found: {analysis_id}")]
    AnalysisNotFound {
        /// The analysis that was requested.
        analysis_id: String,
    },

    /// The pipeline ended failed while continue-on-error was disabled.
    #[error("Pipeline failed; failed stages: {}", failed_stages.join(", "))]
    PipelineFailed {
        /// Names of every stage that ended failed.
        failed_stages: Vec<String>,
    },

    /// The orchestrator configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl OrchestratorError {
    /// Creates a stage execution error.
    #[must_use]
    pub fn stage_execution(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Creates an output write error.
    #[must_use]
    pub fn output_write(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputWrite {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a state read error.
    #[must_use]
    pub fn state_read(analysis_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateRead {
            analysis_id: analysis_id.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a stage's upstream dependency did not succeed.
///
/// Recorded against the blocked stage without invoking its executor and
/// without consuming a retry.
#[derive(Debug, Clone, Error)]
#[error(
    "Stage {stage} blocked: requires {}; failed: {}",
    required.join(", "),
    failed.join(", ")
)]
pub struct StageDependencyError {
    /// The stage that was blocked.
    pub stage: String,
    /// Every dependency the stage requires.
    pub required: Vec<String>,
    /// The dependencies that did not succeed.
    pub failed: Vec<String>,
}

impl StageDependencyError {
    /// Creates a new dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, required: Vec<String>, failed: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            required,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_error_message_lists_stages() {
        let err = StageDependencyError::new(
            "comparator",
            vec!["document_reader".to_string(), "code_reader".to_string()],
            vec!["code_reader".to_string()],
        );

        let msg = err.to_string();
        assert!(msg.contains("comparator"));
        assert!(msg.contains("document_reader, code_reader"));
        assert!(msg.contains("failed: code_reader"));
    }

    #[test]
    fn test_pipeline_failed_names_all_stages() {
        let err = OrchestratorError::PipelineFailed {
            failed_stages: vec!["document_reader".to_string(), "comparator".to_string()],
        };

        assert!(err.to_string().contains("document_reader, comparator"));
    }

    #[test]
    fn test_dependency_error_converts_to_orchestrator_error() {
        let dep = StageDependencyError::new("issue_generator", vec!["comparator".to_string()], vec![
            "comparator".to_string(),
        ]);
        let err: OrchestratorError = dep.into();

        assert!(matches!(err, OrchestratorError::StageDependency(_)));
    }
}
