//! Human-facing analysis report derived from final stage results.

use crate::state::{
    PipelineState, PipelineStatistics, StageName, StageResult, StageStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Overall outcome of the analysis, judged over required stages only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every required stage succeeded.
    Success,
    /// Some required stages succeeded, some did not.
    Partial,
    /// No required stage succeeded.
    Failed,
}

/// Availability of one analysis area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSummary {
    /// Whether the area's stage completed.
    pub available: bool,
    /// Location of the area's output, when produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

/// What a recommendation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    /// A stage failed and should be retried.
    FailedStage,
    /// Issue generation could be enabled.
    EnableIssueGeneration,
    /// The scope covered a subset of the analysis.
    ScopeNarrowing,
    /// Everything requested completed.
    Acknowledgement,
}

/// One prioritized recommendation; 1 is the highest priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Ascending priority number.
    pub priority: u8,
    /// Recommendation category.
    pub category: RecommendationCategory,
    /// Human-readable message.
    pub message: String,
}

/// Condensed per-stage record for the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    /// The stage.
    pub name: StageName,
    /// Final status for the run.
    pub status: StageStatus,
    /// Attempt duration in milliseconds, when the stage was invoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Retries consumed.
    pub retry_count: u32,
    /// Error message when the stage did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The persisted report document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// The analysis this report describes.
    pub analysis_id: String,
    /// The analyzed project.
    pub project_id: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Overall outcome.
    pub overall_status: OverallStatus,
    /// Documentation inventory area.
    pub documents: AreaSummary,
    /// Code inventory area.
    pub code: AreaSummary,
    /// Gap comparison area.
    pub comparison: AreaSummary,
    /// Issue generation area.
    pub issues: AreaSummary,
    /// Per-stage details.
    pub stages: Vec<StageSummary>,
    /// Run statistics.
    pub statistics: PipelineStatistics,
    /// Prioritized recommendations, ascending by priority.
    pub recommendations: Vec<Recommendation>,
}

/// Derives reports from final pipeline state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportGenerator;

impl ReportGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Builds the report for a finished (or stopped) run.
    #[must_use]
    pub fn generate(
        &self,
        state: &PipelineState,
        results: &HashMap<StageName, StageResult>,
    ) -> AnalysisReport {
        AnalysisReport {
            analysis_id: state.analysis_id.clone(),
            project_id: state.project_id.clone(),
            generated_at: Utc::now(),
            overall_status: overall_status(state),
            documents: area_summary(state, StageName::DocumentReader),
            code: area_summary(state, StageName::CodeReader),
            comparison: area_summary(state, StageName::Comparator),
            issues: area_summary(state, StageName::IssueGenerator),
            stages: stage_summaries(state, results),
            statistics: state.statistics.clone(),
            recommendations: recommendations(state),
        }
    }
}

fn overall_status(state: &PipelineState) -> OverallStatus {
    let required: Vec<_> = state
        .stages
        .iter()
        .filter(|s| s.name.is_required())
        .collect();
    let succeeded = required
        .iter()
        .filter(|s| s.status == StageStatus::Completed)
        .count();

    if succeeded == required.len() {
        OverallStatus::Success
    } else if succeeded == 0 {
        OverallStatus::Failed
    } else {
        OverallStatus::Partial
    }
}

fn area_summary(state: &PipelineState, stage: StageName) -> AreaSummary {
    state.stage(stage).map_or_else(AreaSummary::default, |s| AreaSummary {
        available: s.status == StageStatus::Completed,
        output_path: s.output_path.clone(),
    })
}

fn stage_summaries(
    state: &PipelineState,
    results: &HashMap<StageName, StageResult>,
) -> Vec<StageSummary> {
    state
        .stages
        .iter()
        .map(|s| StageSummary {
            name: s.name,
            status: s.status,
            duration_ms: results.get(&s.name).map(|r| r.duration_ms),
            retry_count: s.retry_count,
            error: s.error.clone(),
        })
        .collect()
}

fn recommendations(state: &PipelineState) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    let failed: Vec<_> = state
        .stages
        .iter()
        .filter(|s| s.status == StageStatus::Failed)
        .collect();
    for stage in &failed {
        let detail = stage.error.as_deref().unwrap_or("unknown error");
        recs.push(Recommendation {
            priority: 1,
            category: RecommendationCategory::FailedStage,
            message: format!(
                "Stage {} failed: {detail}. Resume the analysis with retry_failed to run it again.",
                stage.name
            ),
        });
    }

    let comparator_completed = state
        .stage(StageName::Comparator)
        .is_some_and(|s| s.status == StageStatus::Completed);
    if !state.generate_issues && state.scope.supports_issue_generation() && comparator_completed {
        recs.push(Recommendation {
            priority: 2,
            category: RecommendationCategory::EnableIssueGeneration,
            message: "Enable issue generation to turn comparison gaps into tracked issues."
                .to_string(),
        });
    }

    if state.scope != crate::state::AnalysisScope::Full {
        recs.push(Recommendation {
            priority: 3,
            category: RecommendationCategory::ScopeNarrowing,
            message: format!(
                "Scope {} covers a subset of the analysis; run a full analysis for complete coverage.",
                state.scope
            ),
        });
    }

    if failed.is_empty() {
        recs.push(Recommendation {
            priority: 4,
            category: RecommendationCategory::Acknowledgement,
            message: "All requested stages completed successfully.".to_string(),
        });
    }

    recs.sort_by_key(|r| r.priority);
    recs
}
