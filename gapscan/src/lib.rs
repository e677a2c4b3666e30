//! # Gapscan
//!
//! An orchestration engine for multi-stage documentation/code gap analysis.
//!
//! Gapscan coordinates the four fixed analysis stages (document inventory,
//! code inventory, gap comparison, issue generation) with:
//!
//! - **Durable sessions**: pipeline state is persisted after every status
//!   transition and can be queried or resumed after a crash or abort
//! - **Failure isolation**: bounded retries with capped exponential backoff
//!   and a per-stage circuit breaker
//! - **Parallel readers**: the two inventory stages run concurrently under a
//!   batch timeout with optional fail-fast abort
//! - **Pluggable executors**: the content-producing logic behind each stage
//!   is injected through the [`executor::StageExecutor`] trait
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gapscan::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = ExecutorRegistry::new()
//!     .with_executor(Arc::new(DocInventoryExecutor::new()))
//!     .with_executor(Arc::new(CodeInventoryExecutor::new()))
//!     .with_executor(Arc::new(GapComparatorExecutor::new()));
//!
//! let manager = PipelineSessionManager::new(OrchestratorConfig::default(), registry)?;
//! manager.start_analysis("./my-project", AnalysisScope::Full, false, None).await?;
//! let outcome = manager.execute().await?;
//! println!("{:?}", outcome.report.overall_status);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod cancellation;
pub mod config;
pub mod deps;
pub mod errors;
pub mod executor;
pub mod observability;
pub mod parallel;
pub mod report;
pub mod retry;
pub mod session;
pub mod state;
pub mod store;
pub mod testing;

#[cfg(test)]
mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{CircuitBreakerConfig, CircuitState, StageCircuitBreaker};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{OrchestratorConfig, OutputFormat};
    pub use crate::deps::DependencyResolver;
    pub use crate::errors::{OrchestratorError, StageDependencyError};
    pub use crate::executor::{
        ExecutorContext, ExecutorOutput, ExecutorRegistry, StageExecutor,
    };
    pub use crate::observability::init_tracing;
    pub use crate::parallel::{
        ParallelCoordinator, ParallelDisposition, ParallelExecutionResult, ParallelPolicy,
        ParallelStageOutcome,
    };
    pub use crate::report::{
        AnalysisReport, AreaSummary, OverallStatus, Recommendation, ReportGenerator,
    };
    pub use crate::retry::{
        BackoffStrategy, JitterStrategy, RetryConfig, RetryController, StageTimeouts,
    };
    pub use crate::session::{ExecutionOutcome, PipelineSessionManager};
    pub use crate::state::{
        AnalysisScope, AnalysisSession, PipelineStage, PipelineState, PipelineStatistics,
        PipelineStatus, StageName, StageResult, StageStatus,
    };
    pub use crate::store::StateStore;
}
