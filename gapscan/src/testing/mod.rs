//! Test doubles for the stage executor seam.
//!
//! These are exported so downstream crates can exercise orchestration
//! behavior without real sub-agents.

mod mocks;

pub use mocks::{FailingExecutor, FlakyExecutor, HangingExecutor, MockExecutor};
