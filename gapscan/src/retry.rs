//! Retry controller wrapping a single stage invocation.
//!
//! Enforces the per-stage timeout, consults the circuit breaker before and
//! after every attempt, and retries with capped exponential backoff.

use crate::breaker::StageCircuitBreaker;
use crate::cancellation::CancellationToken;
use crate::executor::{ExecutorContext, StageExecutor};
use crate::state::{StageName, StageResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Synthesized error message for attempts cut short by cancellation.
pub const ABORTED_MESSAGE: &str = "Execution aborted due to fail-fast or timeout";

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(retry - 1)
    #[default]
    Exponential,
    /// delay = base * retry
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy to spread retries of executors that share a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter; delays are exactly the backoff sequence.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.base_delay_ms = delay_ms;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given retry (1-based), capped and jittered.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms;
        let raw = match self.backoff {
            BackoffStrategy::Exponential => {
                base.saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)))
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry)),
            BackoffStrategy::Constant => base,
        };
        let capped = raw.min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => {
                if capped == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=capped)
                }
            }
            JitterStrategy::Equal => {
                let half = capped / 2;
                if half == 0 {
                    capped
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Per-stage execution time budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Budget for stages without an explicit entry, in milliseconds.
    pub default_ms: u64,
    /// Per-stage overrides in milliseconds.
    #[serde(default)]
    pub per_stage_ms: HashMap<StageName, u64>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        let mut per_stage_ms = HashMap::new();
        per_stage_ms.insert(StageName::DocumentReader, 600_000);
        per_stage_ms.insert(StageName::CodeReader, 900_000);
        per_stage_ms.insert(StageName::Comparator, 300_000);
        per_stage_ms.insert(StageName::IssueGenerator, 300_000);
        Self {
            default_ms: 300_000,
            per_stage_ms,
        }
    }
}

impl StageTimeouts {
    /// Creates the default budgets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the budget for one stage.
    #[must_use]
    pub fn with_stage_timeout_ms(mut self, stage: StageName, timeout_ms: u64) -> Self {
        self.per_stage_ms.insert(stage, timeout_ms);
        self
    }

    /// Overrides the fallback budget.
    #[must_use]
    pub fn with_default_ms(mut self, timeout_ms: u64) -> Self {
        self.default_ms = timeout_ms;
        self
    }

    /// The budget for a stage.
    #[must_use]
    pub fn timeout_for(&self, stage: StageName) -> Duration {
        Duration::from_millis(
            self.per_stage_ms
                .get(&stage)
                .copied()
                .unwrap_or(self.default_ms),
        )
    }
}

/// Wraps one stage invocation with timeout, breaker gating, and retries.
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
    timeouts: StageTimeouts,
    breaker: Arc<StageCircuitBreaker>,
}

impl RetryController {
    /// Creates a controller sharing the given breaker.
    #[must_use]
    pub fn new(
        config: RetryConfig,
        timeouts: StageTimeouts,
        breaker: Arc<StageCircuitBreaker>,
    ) -> Self {
        Self {
            config,
            timeouts,
            breaker,
        }
    }

    /// Runs one stage to a final [`StageResult`].
    ///
    /// The breaker is consulted before any attempt; an open circuit fails the
    /// stage immediately with no retry consumed and no executor invoked. A
    /// timeout counts as a failure for retry purposes. Once the breaker opens
    /// mid-sequence, remaining retries are forfeited.
    pub async fn run(
        &self,
        stage: StageName,
        executor: Arc<dyn StageExecutor>,
        ctx: &ExecutorContext,
        token: &CancellationToken,
    ) -> StageResult {
        let started = Instant::now();

        if self.breaker.is_open(stage) {
            debug!(stage = %stage, "Rejecting attempt: circuit open");
            return StageResult::failure(
                stage,
                format!("Circuit breaker open for stage {stage}"),
                0,
                elapsed_ms(started),
            );
        }

        let timeout = self.timeouts.timeout_for(stage);
        let mut retries: u32 = 0;

        loop {
            if token.is_cancelled() {
                return StageResult::failure(stage, ABORTED_MESSAGE, retries, elapsed_ms(started));
            }

            let attempt = tokio::select! {
                outcome = tokio::time::timeout(timeout, executor.execute(ctx)) => {
                    match outcome {
                        Ok(Ok(output)) => Ok(output),
                        Ok(Err(e)) => Err(format!("{e:#}")),
                        Err(_) => Err(format!("Stage timeout after {}ms", timeout.as_millis())),
                    }
                }
                () = token.cancelled() => {
                    return StageResult::failure(
                        stage,
                        ABORTED_MESSAGE,
                        retries,
                        elapsed_ms(started),
                    );
                }
            };

            match attempt {
                Ok(output) => {
                    self.breaker.record_success(stage);
                    return StageResult::success(
                        stage,
                        output.output_path,
                        retries,
                        elapsed_ms(started),
                    );
                }
                Err(message) => {
                    warn!(stage = %stage, retries, error = %message, "Stage attempt failed");
                    self.breaker.record_failure(stage);

                    if self.breaker.is_open(stage) {
                        return StageResult::failure(
                            stage,
                            format!("Circuit opened after repeated failures: {message}"),
                            retries,
                            elapsed_ms(started),
                        );
                    }
                    if retries >= self.config.max_retries {
                        return StageResult::failure(stage, message, retries, elapsed_ms(started));
                    }

                    retries += 1;
                    let delay = self.config.delay_for(retries);
                    debug!(
                        stage = %stage,
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying stage after delay"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = token.cancelled() => {
                            return StageResult::failure(
                                stage,
                                ABORTED_MESSAGE,
                                retries,
                                elapsed_ms(started),
                            );
                        }
                    }
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
