//! Mock stage executors with call recording.

use crate::executor::{ExecutorContext, ExecutorOutput, StageExecutor};
use crate::state::StageName;
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// An executor that succeeds with a fixed output location.
#[derive(Debug)]
pub struct MockExecutor {
    stage: StageName,
    output_path: String,
    delay: Option<Duration>,
    call_count: Mutex<usize>,
}

impl MockExecutor {
    /// Creates an executor that immediately succeeds.
    #[must_use]
    pub fn succeeding(stage: StageName, output_path: impl Into<String>) -> Self {
        Self {
            stage,
            output_path: output_path.into(),
            delay: None,
            call_count: Mutex::new(0),
        }
    }

    /// Adds a delay before each success.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times the executor was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl StageExecutor for MockExecutor {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, _ctx: &ExecutorContext) -> anyhow::Result<ExecutorOutput> {
        *self.call_count.lock() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ExecutorOutput::at(self.output_path.clone()))
    }
}

/// An executor that always fails.
#[derive(Debug)]
pub struct FailingExecutor {
    stage: StageName,
    error: String,
    call_count: Mutex<usize>,
}

impl FailingExecutor {
    /// Creates an executor that fails with the given message.
    #[must_use]
    pub fn new(stage: StageName, error: impl Into<String>) -> Self {
        Self {
            stage,
            error: error.into(),
            call_count: Mutex::new(0),
        }
    }

    /// Number of times the executor was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl StageExecutor for FailingExecutor {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, _ctx: &ExecutorContext) -> anyhow::Result<ExecutorOutput> {
        *self.call_count.lock() += 1;
        Err(anyhow!("{}", self.error))
    }
}

/// An executor that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyExecutor {
    stage: StageName,
    failures_before_success: usize,
    output_path: String,
    call_count: Mutex<usize>,
}

impl FlakyExecutor {
    /// Creates an executor that fails `failures_before_success` times.
    #[must_use]
    pub fn new(
        stage: StageName,
        failures_before_success: usize,
        output_path: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            failures_before_success,
            output_path: output_path.into(),
            call_count: Mutex::new(0),
        }
    }

    /// Number of times the executor was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl StageExecutor for FlakyExecutor {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, _ctx: &ExecutorContext) -> anyhow::Result<ExecutorOutput> {
        let calls = {
            let mut count = self.call_count.lock();
            *count += 1;
            *count
        };
        if calls <= self.failures_before_success {
            Err(anyhow!("transient failure on call {calls}"))
        } else {
            Ok(ExecutorOutput::at(self.output_path.clone()))
        }
    }
}

/// An executor that sleeps far past any reasonable budget.
#[derive(Debug)]
pub struct HangingExecutor {
    stage: StageName,
    sleep: Duration,
}

impl HangingExecutor {
    /// Creates an executor that sleeps for `sleep` before succeeding.
    #[must_use]
    pub fn new(stage: StageName, sleep: Duration) -> Self {
        Self { stage, sleep }
    }
}

#[async_trait]
impl StageExecutor for HangingExecutor {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn execute(&self, _ctx: &ExecutorContext) -> anyhow::Result<ExecutorOutput> {
        tokio::time::sleep(self.sleep).await;
        Ok(ExecutorOutput::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flaky_executor_recovers() {
        let executor = FlakyExecutor::new(StageName::CodeReader, 2, "code.json");
        let ctx = ExecutorContext::new("/tmp/p", "p");

        assert!(executor.execute(&ctx).await.is_err());
        assert!(executor.execute(&ctx).await.is_err());
        assert!(executor.execute(&ctx).await.is_ok());
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failing_executor_reports_message() {
        let executor = FailingExecutor::new(StageName::Comparator, "diff engine crashed");
        let ctx = ExecutorContext::new("/tmp/p", "p");

        let err = executor.execute(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("diff engine crashed"));
    }
}
