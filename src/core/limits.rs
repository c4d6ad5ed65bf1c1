//! Run limits and enforcement.
//!
//! Prevents runaway execution through configurable limits on:
//! - Per-round executor timeouts
//! - Total run duration
//! - Output sizes

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits applied to every run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Per-round executor timeout in seconds (default: 300 = 5 min)
    #[serde(default = "default_round_timeout")]
    pub round_timeout_seconds: u64,

    /// Total run timeout in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,

    /// Maximum serialized round output in bytes (default: 10MB)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,
}

fn default_round_timeout() -> u64 {
    300
} // 5 min
fn default_run_timeout() -> u64 {
    3600
} // 1 hour
fn default_max_output_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            round_timeout_seconds: default_round_timeout(),
            run_timeout_seconds: default_run_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl RunLimits {
    /// Check elapsed run time against the run timeout
    pub fn check(&self, clock: &RunClock) -> Result<(), LimitViolation> {
        let elapsed = clock.elapsed_seconds();
        if elapsed >= self.run_timeout_seconds {
            return Err(LimitViolation::RunTimeout {
                elapsed_seconds: elapsed,
                limit_seconds: self.run_timeout_seconds,
            });
        }
        Ok(())
    }

    /// Time left before the run timeout (zero once it has passed)
    pub fn remaining(&self, clock: &RunClock) -> Duration {
        Duration::from_secs(self.run_timeout_seconds).saturating_sub(clock.elapsed())
    }

    /// The violation reported when the run deadline is reached
    pub fn expired(&self, clock: &RunClock) -> LimitViolation {
        LimitViolation::RunTimeout {
            elapsed_seconds: clock.elapsed_seconds().max(self.run_timeout_seconds),
            limit_seconds: self.run_timeout_seconds,
        }
    }
}

/// Tracks elapsed time and rounds executed for one run
#[derive(Debug, Clone)]
pub struct RunClock {
    /// Rounds that completed successfully
    pub rounds_completed: u32,

    /// Executor invocations, including retries
    pub attempts: u32,

    /// When the run started
    pub started_at: Instant,
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RunClock {
    pub fn new() -> Self {
        Self {
            rounds_completed: 0,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_round(&mut self) {
        self.rounds_completed += 1;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get elapsed time in seconds
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed().as_secs()
    }
}

/// Limit violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    RunTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}
