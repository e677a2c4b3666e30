//! Orchestrator configuration.
//!
//! Every knob is optional with a default; component-specific settings live
//! with their components ([`RetryConfig`], [`StageTimeouts`],
//! [`CircuitBreakerConfig`], [`ParallelPolicy`]) and are aggregated here.

use crate::breaker::CircuitBreakerConfig;
use crate::errors::OrchestratorError;
use crate::parallel::ParallelPolicy;
use crate::retry::{RetryConfig, StageTimeouts};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// On-disk format for state and report documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// YAML.
    Yaml,
}

impl OutputFormat {
    /// The file extension for this format.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Base directory for persisted state and reports.
    pub scratchpad_dir: PathBuf,
    /// Run the two readers concurrently when both are pending.
    pub parallel_execution: bool,
    /// Keep executing later stages after a required stage fails. When false
    /// the run stops at the first required failure and `execute` raises
    /// `PipelineFailed` once state is persisted.
    pub continue_on_error: bool,
    /// Retry behavior for every stage attempt.
    pub retry: RetryConfig,
    /// Per-stage execution budgets.
    pub timeouts: StageTimeouts,
    /// Circuit breaker settings.
    pub breaker: CircuitBreakerConfig,
    /// Parallel batch policy.
    pub parallel: ParallelPolicy,
    /// Persistence format.
    pub output_format: OutputFormat,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scratchpad_dir: PathBuf::from(".gapscan"),
            parallel_execution: true,
            continue_on_error: true,
            retry: RetryConfig::default(),
            timeouts: StageTimeouts::default(),
            breaker: CircuitBreakerConfig::default(),
            parallel: ParallelPolicy::default(),
            output_format: OutputFormat::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scratchpad directory.
    #[must_use]
    pub fn with_scratchpad_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratchpad_dir = dir.into();
        self
    }

    /// Enables or disables parallel reader execution.
    #[must_use]
    pub fn with_parallel_execution(mut self, enabled: bool) -> Self {
        self.parallel_execution = enabled;
        self
    }

    /// Sets the continue-on-error policy.
    #[must_use]
    pub fn with_continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the stage timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the circuit breaker configuration.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Sets the parallel batch policy.
    #[must_use]
    pub fn with_parallel_policy(mut self, policy: ParallelPolicy) -> Self {
        self.parallel = policy;
        self
    }

    /// Sets the persistence format.
    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.breaker.failure_threshold < 1 {
            return Err(OrchestratorError::InvalidConfiguration(
                "breaker.failure_threshold must be >= 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(OrchestratorError::InvalidConfiguration(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        if self.parallel.batch_timeout_ms == 0 {
            return Err(OrchestratorError::InvalidConfiguration(
                "parallel.batch_timeout_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.parallel.min_success_ratio) {
            return Err(OrchestratorError::InvalidConfiguration(
                "parallel.min_success_ratio must be within [0, 1]".to_string(),
            ));
        }
        if self.timeouts.default_ms == 0 {
            return Err(OrchestratorError::InvalidConfiguration(
                "timeouts.default_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_success_ratio() {
        let config = OrchestratorConfig::new()
            .with_parallel_policy(ParallelPolicy::new().with_min_success_ratio(1.5));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_success_ratio"));
    }

    #[test]
    fn test_rejects_zero_batch_timeout() {
        let config = OrchestratorConfig::new()
            .with_parallel_policy(ParallelPolicy::new().with_batch_timeout_ms(0));

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_retry_delays() {
        let config = OrchestratorConfig::new().with_retry(
            RetryConfig::new()
                .with_base_delay_ms(60_000)
                .with_max_delay_ms(30_000),
        );

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_format_extension() {
        assert_eq!(OutputFormat::Json.extension(), "json");
        assert_eq!(OutputFormat::Yaml.extension(), "yaml");
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = OrchestratorConfig::new()
            .with_scratchpad_dir("/tmp/scratch")
            .with_output_format(OutputFormat::Yaml);

        let json = serde_json::to_string(&config).unwrap();
        let loaded: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, loaded);
    }
}
