//! Parallel execution of independent stages.
//!
//! Runs a batch concurrently under a shared cancellation token, races the
//! whole batch against a batch-level timeout, and optionally aborts siblings
//! when a critical stage fails.

use crate::cancellation::CancellationToken;
use crate::state::{StageName, StageResult};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Policy governing a parallel batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelPolicy {
    /// Budget for the whole batch in milliseconds, independent of per-stage
    /// timeouts.
    pub batch_timeout_ms: u64,
    /// Abort siblings as soon as a critical stage fails.
    pub fail_fast: bool,
    /// Stages whose failure triggers fail-fast.
    #[serde(default)]
    pub critical_stages: Vec<StageName>,
    /// When false, the batch can only continue if every stage succeeded.
    pub allow_partial_results: bool,
    /// Minimum fraction of successful stages when partial results are
    /// allowed.
    pub min_success_ratio: f64,
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        Self {
            batch_timeout_ms: 1_200_000,
            fail_fast: false,
            critical_stages: Vec::new(),
            allow_partial_results: true,
            min_success_ratio: 0.5,
        }
    }
}

impl ParallelPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch timeout.
    #[must_use]
    pub fn with_batch_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.batch_timeout_ms = timeout_ms;
        self
    }

    /// Enables fail-fast for the given critical stages.
    #[must_use]
    pub fn with_fail_fast(mut self, critical_stages: Vec<StageName>) -> Self {
        self.fail_fast = true;
        self.critical_stages = critical_stages;
        self
    }

    /// Sets whether partial results are acceptable.
    #[must_use]
    pub fn with_allow_partial_results(mut self, allow: bool) -> Self {
        self.allow_partial_results = allow;
        self
    }

    /// Sets the minimum success ratio for partial results.
    #[must_use]
    pub fn with_min_success_ratio(mut self, ratio: f64) -> Self {
        self.min_success_ratio = ratio;
        self
    }
}

/// How one stage in a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelDisposition {
    /// The stage ran and succeeded.
    Fulfilled,
    /// The stage ran and failed.
    Rejected,
    /// The stage was still in flight when the batch timed out.
    Timeout,
    /// The stage was cancelled by fail-fast (or an external cancel).
    Aborted,
}

/// One stage's outcome within a batch.
#[derive(Debug, Clone)]
pub struct ParallelStageOutcome {
    /// The stage.
    pub stage: StageName,
    /// How the stage ended.
    pub disposition: ParallelDisposition,
    /// The stage result, when the stage actually finished running.
    pub result: Option<StageResult>,
}

/// Outcome of a whole parallel batch.
#[derive(Debug, Clone)]
pub struct ParallelExecutionResult {
    /// Per-stage outcomes in input order.
    pub outcomes: Vec<ParallelStageOutcome>,
    /// Stages that succeeded.
    pub fulfilled_count: usize,
    /// Stages that ran and failed.
    pub rejected_count: usize,
    /// Stages cut off by the batch timeout.
    pub timeout_count: usize,
    /// Stages aborted by cancellation.
    pub aborted_count: usize,
    /// Whether the run may proceed past this batch.
    pub can_continue: bool,
    /// Wall-clock duration of the batch in milliseconds.
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelCause {
    BatchTimeout,
    FailFast,
}

/// Coordinates one batch of mutually independent stages.
#[derive(Debug, Clone)]
pub struct ParallelCoordinator {
    policy: ParallelPolicy,
}

impl ParallelCoordinator {
    /// Creates a coordinator with the given policy.
    #[must_use]
    pub fn new(policy: ParallelPolicy) -> Self {
        Self { policy }
    }

    /// Runs every stage concurrently and classifies the outcomes.
    ///
    /// `run` is invoked once per stage with the shared cancellation token;
    /// completion handling is keyed by stage name, so input order determines
    /// output order regardless of which stage finishes first.
    pub async fn execute<F, Fut>(&self, stages: &[StageName], run: F) -> ParallelExecutionResult
    where
        F: Fn(StageName, Arc<CancellationToken>) -> Fut,
        Fut: Future<Output = StageResult> + Send + 'static,
    {
        let started = Instant::now();
        if stages.is_empty() {
            return self.classify(stages, &HashMap::new(), None, started);
        }

        let token = Arc::new(CancellationToken::new());
        let mut tasks = FuturesUnordered::new();
        for &stage in stages {
            let fut = run(stage, Arc::clone(&token));
            let task_token = Arc::clone(&token);
            tasks.push(tokio::spawn(async move {
                tokio::select! {
                    result = fut => (stage, Some(result)),
                    () = task_token.cancelled() => (stage, None),
                }
            }));
        }

        let deadline = tokio::time::sleep(Duration::from_millis(self.policy.batch_timeout_ms));
        tokio::pin!(deadline);

        let mut finished: HashMap<StageName, Option<StageResult>> = HashMap::new();
        let mut cancel_cause: Option<CancelCause> = None;

        while finished.len() < stages.len() {
            tokio::select! {
                () = &mut deadline, if cancel_cause.is_none() => {
                    warn!(
                        batch_timeout_ms = self.policy.batch_timeout_ms,
                        "Parallel batch timed out, cancelling outstanding stages"
                    );
                    cancel_cause = Some(CancelCause::BatchTimeout);
                    token.cancel("batch timeout exceeded");
                }
                joined = tasks.next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((stage, outcome)) => {
                            if let Some(result) = &outcome {
                                debug!(stage = %stage, success = result.success, "Parallel stage finished");
                                if !result.success
                                    && self.policy.fail_fast
                                    && self.policy.critical_stages.contains(&stage)
                                    && cancel_cause.is_none()
                                {
                                    warn!(stage = %stage, "Critical stage failed, aborting siblings");
                                    cancel_cause = Some(CancelCause::FailFast);
                                    token.cancel(format!("critical stage {stage} failed"));
                                }
                            }
                            finished.insert(stage, outcome);
                        }
                        Err(join_error) => {
                            warn!(error = %join_error, "Parallel stage task failed to join");
                        }
                    }
                }
            }
        }

        self.classify(stages, &finished, cancel_cause, started)
    }

    fn classify(
        &self,
        stages: &[StageName],
        finished: &HashMap<StageName, Option<StageResult>>,
        cancel_cause: Option<CancelCause>,
        started: Instant,
    ) -> ParallelExecutionResult {
        let unfinished_disposition = match cancel_cause {
            Some(CancelCause::BatchTimeout) => ParallelDisposition::Timeout,
            _ => ParallelDisposition::Aborted,
        };

        let outcomes: Vec<ParallelStageOutcome> = stages
            .iter()
            .map(|&stage| match finished.get(&stage) {
                Some(Some(result)) if result.success => ParallelStageOutcome {
                    stage,
                    disposition: ParallelDisposition::Fulfilled,
                    result: Some(result.clone()),
                },
                Some(Some(result)) => ParallelStageOutcome {
                    stage,
                    disposition: ParallelDisposition::Rejected,
                    result: Some(result.clone()),
                },
                Some(None) | None => ParallelStageOutcome {
                    stage,
                    disposition: unfinished_disposition,
                    result: None,
                },
            })
            .collect();

        let count = |d: ParallelDisposition| outcomes.iter().filter(|o| o.disposition == d).count();
        let fulfilled_count = count(ParallelDisposition::Fulfilled);
        let total = stages.len();

        let can_continue = if total == 0 {
            true
        } else if self.policy.allow_partial_results {
            #[allow(clippy::cast_precision_loss)]
            let ratio = fulfilled_count as f64 / total as f64;
            ratio >= self.policy.min_success_ratio
        } else {
            fulfilled_count == total
        };

        ParallelExecutionResult {
            fulfilled_count,
            rejected_count: count(ParallelDisposition::Rejected),
            timeout_count: count(ParallelDisposition::Timeout),
            aborted_count: count(ParallelDisposition::Aborted),
            can_continue,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcomes,
        }
    }
}
