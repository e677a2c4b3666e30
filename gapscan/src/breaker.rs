//! Per-stage circuit breaker.
//!
//! Tracks consecutive failures per stage and stops invoking a stage for a
//! cooldown window once the threshold is reached. Breaker state is ephemeral
//! and never persisted.

use crate::state::StageName;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown in milliseconds before a probe is admitted again.
    pub reset_timeout_ms: u64,
    /// When false the breaker never rejects and records nothing.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            enabled: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the reset timeout.
    #[must_use]
    pub fn with_reset_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.reset_timeout_ms = timeout_ms;
        self
    }

    /// Enables or disables the breaker.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Derived state of one stage's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Failures below threshold; attempts pass through.
    Closed,
    /// Cooldown in effect; attempts are rejected.
    Open,
    /// Cooldown elapsed; exactly one probe attempt is admitted.
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerEntry {
    failures: u32,
    open_until: Option<Instant>,
    last_success: Option<Instant>,
}

/// Failure-isolation tracker for every stage, safe to consult from
/// concurrent stage attempts.
#[derive(Debug)]
pub struct StageCircuitBreaker {
    config: CircuitBreakerConfig,
    entries: DashMap<StageName, BreakerEntry>,
}

impl StageCircuitBreaker {
    /// Creates a breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Records a failed attempt; opens the circuit at the threshold.
    pub fn record_failure(&self, stage: StageName) {
        if !self.config.enabled {
            return;
        }
        let mut entry = self.entries.entry(stage).or_default();
        entry.failures += 1;
        if entry.failures >= self.config.failure_threshold {
            entry.open_until =
                Some(Instant::now() + Duration::from_millis(self.config.reset_timeout_ms));
            warn!(
                stage = %stage,
                failures = entry.failures,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit opened for stage"
            );
        }
    }

    /// Records a successful attempt, closing the circuit.
    pub fn record_success(&self, stage: StageName) {
        if !self.config.enabled {
            return;
        }
        let mut entry = self.entries.entry(stage).or_default();
        entry.failures = 0;
        entry.open_until = None;
        entry.last_success = Some(Instant::now());
    }

    /// Returns true while the cooldown is in effect.
    ///
    /// Once the cooldown has elapsed the deadline is cleared and `false` is
    /// returned, admitting exactly one probe; the probe's outcome either
    /// closes the circuit or re-opens it at the (still met) threshold.
    pub fn is_open(&self, stage: StageName) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(mut entry) = self.entries.get_mut(&stage) else {
            return false;
        };
        match entry.open_until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                debug!(stage = %stage, "Circuit cooldown elapsed, admitting probe");
                entry.open_until = None;
                false
            }
            None => false,
        }
    }

    /// Derived circuit state without mutating the entry.
    #[must_use]
    pub fn state(&self, stage: StageName) -> CircuitState {
        if !self.config.enabled {
            return CircuitState::Closed;
        }
        let Some(entry) = self.entries.get(&stage) else {
            return CircuitState::Closed;
        };
        if entry.failures < self.config.failure_threshold {
            return CircuitState::Closed;
        }
        match entry.open_until {
            Some(deadline) if Instant::now() < deadline => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    /// Current consecutive failure count for a stage.
    #[must_use]
    pub fn failure_count(&self, stage: StageName) -> u32 {
        self.entries.get(&stage).map_or(0, |e| e.failures)
    }
}

impl Default for StageCircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_closed_below_threshold() {
        let breaker = StageCircuitBreaker::default();

        breaker.record_failure(StageName::DocumentReader);
        breaker.record_failure(StageName::DocumentReader);

        assert!(!breaker.is_open(StageName::DocumentReader));
        assert_eq!(breaker.state(StageName::DocumentReader), CircuitState::Closed);
        assert_eq!(breaker.failure_count(StageName::DocumentReader), 2);
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = StageCircuitBreaker::default();

        for _ in 0..3 {
            breaker.record_failure(StageName::CodeReader);
        }

        assert!(breaker.is_open(StageName::CodeReader));
        assert_eq!(breaker.state(StageName::CodeReader), CircuitState::Open);
        // Other stages are unaffected.
        assert!(!breaker.is_open(StageName::DocumentReader));
    }

    #[test]
    fn test_success_closes_circuit() {
        let breaker = StageCircuitBreaker::default();

        for _ in 0..3 {
            breaker.record_failure(StageName::Comparator);
        }
        breaker.record_success(StageName::Comparator);

        assert!(!breaker.is_open(StageName::Comparator));
        assert_eq!(breaker.failure_count(StageName::Comparator), 0);
    }

    #[test]
    fn test_half_open_admits_single_probe() {
        let config = CircuitBreakerConfig::new()
            .with_failure_threshold(2)
            .with_reset_timeout_ms(20);
        let breaker = StageCircuitBreaker::new(config);

        breaker.record_failure(StageName::DocumentReader);
        breaker.record_failure(StageName::DocumentReader);
        assert!(breaker.is_open(StageName::DocumentReader));

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(
            breaker.state(StageName::DocumentReader),
            CircuitState::HalfOpen
        );
        // Cooldown elapsed: probe admitted.
        assert!(!breaker.is_open(StageName::DocumentReader));

        // A failing probe re-opens immediately; the threshold is still met.
        breaker.record_failure(StageName::DocumentReader);
        assert!(breaker.is_open(StageName::DocumentReader));
    }

    #[test]
    fn test_disabled_breaker_never_rejects() {
        let breaker =
            StageCircuitBreaker::new(CircuitBreakerConfig::new().with_enabled(false));

        for _ in 0..10 {
            breaker.record_failure(StageName::IssueGenerator);
        }

        assert!(!breaker.is_open(StageName::IssueGenerator));
        assert_eq!(breaker.failure_count(StageName::IssueGenerator), 0);
    }
}
