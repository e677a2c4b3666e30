//! The stage executor seam.
//!
//! Executors are external collaborators, one per stage name; the engine is
//! agnostic to what they do internally. Failures cross the boundary as
//! [`anyhow::Error`] and are recovered into stage results by the retry
//! controller.

use crate::state::StageName;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

/// Inputs handed to a stage executor for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutorContext {
    /// Path of the project under analysis.
    pub project_path: PathBuf,
    /// Project identifier.
    pub project_id: String,
    /// Output locations of upstream stages that already succeeded.
    pub upstream_outputs: HashMap<StageName, String>,
}

impl ExecutorContext {
    /// Creates a context with no upstream outputs.
    #[must_use]
    pub fn new(project_path: impl Into<PathBuf>, project_id: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            project_id: project_id.into(),
            upstream_outputs: HashMap::new(),
        }
    }

    /// Sets the upstream output map.
    #[must_use]
    pub fn with_upstream_outputs(mut self, outputs: HashMap<StageName, String>) -> Self {
        self.upstream_outputs = outputs;
        self
    }
}

/// What a successful executor invocation hands back.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOutput {
    /// Location of the produced artifact, when there is one.
    pub output_path: Option<String>,
}

impl ExecutorOutput {
    /// An output at the given location.
    #[must_use]
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            output_path: Some(path.into()),
        }
    }

    /// A successful invocation that produced no artifact.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Contract for the content-producing logic behind one stage name.
#[async_trait]
pub trait StageExecutor: Send + Sync + Debug {
    /// The stage this executor implements.
    fn stage(&self) -> StageName;

    /// Runs the stage once. Must complete within the configured timeout;
    /// the engine treats an overrun as a failure and may discard the result.
    async fn execute(&self, ctx: &ExecutorContext) -> anyhow::Result<ExecutorOutput>;
}

/// Registry of executors keyed by stage name.
#[derive(Debug, Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<StageName, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under the stage it declares.
    ///
    /// Re-registering a stage replaces the previous executor.
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(executor.stage(), executor);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Looks up the executor for a stage.
    #[must_use]
    pub fn get(&self, stage: StageName) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }

    /// Number of registered executors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true if no executor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
