//! Static stage dependency resolution.
//!
//! The stage graph is fixed: the comparator consumes both inventories (when
//! the scope runs them), and the issue generator consumes the comparison.

use crate::errors::StageDependencyError;
use crate::state::{AnalysisScope, StageName, StageResult};
use std::collections::HashMap;

/// Resolves blocking dependencies for a given pipeline scope.
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver {
    scope: AnalysisScope,
}

impl DependencyResolver {
    /// Creates a resolver for one scope.
    #[must_use]
    pub fn new(scope: AnalysisScope) -> Self {
        Self { scope }
    }

    /// The stages that must succeed before `stage` may start.
    #[must_use]
    pub fn dependencies_of(&self, stage: StageName) -> Vec<StageName> {
        match stage {
            StageName::DocumentReader | StageName::CodeReader => Vec::new(),
            StageName::Comparator => {
                if self.scope.supports_issue_generation() {
                    vec![StageName::DocumentReader, StageName::CodeReader]
                } else {
                    Vec::new()
                }
            }
            StageName::IssueGenerator => vec![StageName::Comparator],
        }
    }

    /// Checks whether every dependency of `stage` succeeded.
    ///
    /// A dependency with no recorded result counts as failed; it never ran.
    pub fn check(
        &self,
        stage: StageName,
        results: &HashMap<StageName, StageResult>,
    ) -> Result<(), StageDependencyError> {
        let required = self.dependencies_of(stage);
        let failed: Vec<StageName> = required
            .iter()
            .copied()
            .filter(|dep| !results.get(dep).is_some_and(|r| r.success))
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StageDependencyError::new(
                stage.as_str(),
                required.iter().map(|s| s.as_str().to_string()).collect(),
                failed.iter().map(|s| s.as_str().to_string()).collect(),
            ))
        }
    }

    /// Splits a scope's pending stages into the concurrent reader batch and
    /// the ordered sequential remainder.
    ///
    /// Only the two readers ever run in parallel, and only when both are
    /// pending and parallel execution is enabled.
    #[must_use]
    pub fn split_groups(
        &self,
        stages: &[StageName],
        parallel_enabled: bool,
    ) -> (Vec<StageName>, Vec<StageName>) {
        let has_both_readers = stages.contains(&StageName::DocumentReader)
            && stages.contains(&StageName::CodeReader);

        if parallel_enabled && has_both_readers {
            let parallel = vec![StageName::DocumentReader, StageName::CodeReader];
            let sequential = stages
                .iter()
                .copied()
                .filter(|s| !parallel.contains(s))
                .collect();
            (parallel, sequential)
        } else {
            (Vec::new(), stages.to_vec())
        }
    }
}
