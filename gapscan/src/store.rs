//! Durable persistence for pipeline state and analysis reports.
//!
//! One state document per analysis under the pipeline-scoped directory, one
//! report document under the analysis-scoped directory. Only the structural
//! shape (snake_case keys mirroring the in-memory types) is a compatibility
//! contract; the format is pluggable between JSON and YAML.

use crate::config::OutputFormat;
use crate::errors::OrchestratorError;
use crate::report::AnalysisReport;
use crate::state::PipelineState;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads and writes analysis documents under a scratchpad directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    base: PathBuf,
    format: OutputFormat,
}

impl StateStore {
    /// Creates a store rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            base: base.into(),
            format,
        }
    }

    /// Path of the state document for an analysis.
    #[must_use]
    pub fn state_path(&self, analysis_id: &str) -> PathBuf {
        self.base
            .join("pipeline")
            .join(format!("{analysis_id}.state.{}", self.format.extension()))
    }

    /// Path of the report document for an analysis.
    #[must_use]
    pub fn report_path(&self, analysis_id: &str) -> PathBuf {
        self.base
            .join(analysis_id)
            .join(format!("report.{}", self.format.extension()))
    }

    /// Persists a pipeline state, creating directories as needed.
    ///
    /// Persistence failures always propagate; they mean the run's durability
    /// guarantee is broken.
    pub async fn save_state(&self, state: &PipelineState) -> Result<PathBuf, OrchestratorError> {
        let path = self.state_path(&state.analysis_id);
        self.write_document(&path, state).await?;
        debug!(analysis_id = %state.analysis_id, path = %path.display(), "Persisted pipeline state");
        Ok(path)
    }

    /// Loads the persisted state for an analysis.
    pub async fn load_state(&self, analysis_id: &str) -> Result<PipelineState, OrchestratorError> {
        let path = self.state_path(analysis_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OrchestratorError::AnalysisNotFound {
                    analysis_id: analysis_id.to_string(),
                });
            }
            Err(e) => {
                return Err(OrchestratorError::state_read(analysis_id, e.to_string()));
            }
        };

        self.parse(&content)
            .map_err(|e| OrchestratorError::state_read(analysis_id, e))
    }

    /// Persists an analysis report.
    pub async fn save_report(
        &self,
        analysis_id: &str,
        report: &AnalysisReport,
    ) -> Result<PathBuf, OrchestratorError> {
        let path = self.report_path(analysis_id);
        self.write_document(&path, report).await?;
        debug!(analysis_id = %analysis_id, path = %path.display(), "Persisted analysis report");
        Ok(path)
    }

    async fn write_document<T: Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), OrchestratorError> {
        let rendered = self
            .render(value)
            .map_err(|e| OrchestratorError::output_write(path.display().to_string(), e))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                OrchestratorError::output_write(parent.display().to_string(), e.to_string())
            })?;
        }
        tokio::fs::write(path, rendered).await.map_err(|e| {
            OrchestratorError::output_write(path.display().to_string(), e.to_string())
        })
    }

    fn render<T: Serialize>(&self, value: &T) -> Result<String, String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        }
    }

    fn parse<T: DeserializeOwned>(&self, content: &str) -> Result<T, String> {
        match self.format {
            OutputFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            OutputFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}
