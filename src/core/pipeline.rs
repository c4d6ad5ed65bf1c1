//! Pipeline plan: the fixed round sequence plus per-round policy.
//!
//! The round order itself is not configurable. What can be tuned (from
//! YAML or code) is which rounds are retryable, per-round timeouts, the
//! retry budget and the run limits.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::limits::RunLimits;
use crate::domain::{FailureKind, RoundId};

/// Policy for a single round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSpec {
    pub round: RoundId,

    /// Whether executor failures may be retried
    pub retryable: bool,

    /// Override timeout for this round (uses limits.round_timeout_seconds if not set)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl RoundSpec {
    pub fn new(round: RoundId) -> Self {
        Self {
            round,
            retryable: round.retryable_by_default(),
            timeout_seconds: None,
        }
    }

    /// Get the effective timeout for this round
    pub fn timeout(&self, limits: &RunLimits) -> Duration {
        let seconds = self.timeout_seconds.unwrap_or(limits.round_timeout_seconds);
        Duration::from_secs(seconds)
    }
}

/// Per-round overrides as written in a config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundOverride {
    pub retryable: Option<bool>,
    pub timeout_seconds: Option<u64>,

    /// Executor-specific pattern name (Fabric)
    pub pattern: Option<String>,
}

/// The complete, ordered plan a run executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelinePlan {
    /// Rounds in execution order
    pub rounds: Vec<RoundSpec>,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub limits: RunLimits,
}

impl Default for PipelinePlan {
    fn default() -> Self {
        Self::standard()
    }
}

impl PipelinePlan {
    /// Every round, default policy
    pub fn standard() -> Self {
        Self {
            rounds: RoundId::ALL.iter().copied().map(RoundSpec::new).collect(),
            retry: RetryPolicy::default(),
            limits: RunLimits::default(),
        }
    }

    /// Apply per-round overrides keyed by round name or key
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, RoundOverride>) -> Result<Self> {
        for (name, ov) in overrides {
            let round: RoundId = name
                .parse()
                .with_context(|| format!("Invalid round in overrides: '{}'", name))?;

            if let Some(spec) = self.rounds.iter_mut().find(|s| s.round == round) {
                if let Some(retryable) = ov.retryable {
                    spec.retryable = retryable;
                }
                if ov.timeout_seconds.is_some() {
                    spec.timeout_seconds = ov.timeout_seconds;
                }
            }
        }
        Ok(self)
    }

    /// Validate the plan: every round exactly once, in the fixed order
    pub fn validate(&self) -> Result<()> {
        let rounds: Vec<RoundId> = self.rounds.iter().map(|s| s.round).collect();

        if rounds.is_empty() {
            anyhow::bail!("Pipeline plan must have at least one round");
        }

        if rounds != RoundId::ALL {
            anyhow::bail!(
                "Pipeline plan must list rounds in the fixed order {:?}, got {:?}",
                RoundId::ALL.map(RoundId::name),
                rounds.iter().map(|r| r.name()).collect::<Vec<_>>()
            );
        }

        for (i, spec) in self.rounds.iter().enumerate() {
            for dep in spec.round.dependencies() {
                if !rounds[..i].contains(dep) {
                    anyhow::bail!(
                        "Round '{}' depends on '{}' which does not run before it",
                        spec.round,
                        dep
                    );
                }
            }
        }

        Ok(())
    }

    /// Get the spec of a round
    pub fn spec(&self, round: RoundId) -> Option<&RoundSpec> {
        self.rounds.iter().find(|s| s.round == round)
    }
}

/// Retry policy for failed rounds
///
/// Executor failures on retryable rounds wait a fixed delay between
/// attempts. Store failures back off exponentially. Validation failures
/// are never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Fixed delay between executor retries in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Initial delay between store retries in milliseconds
    #[serde(default = "default_store_initial_delay")]
    pub store_backoff_initial_ms: u64,

    /// Maximum delay between store retries in milliseconds
    #[serde(default = "default_store_max_delay")]
    pub store_backoff_max_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each store retry)
    #[serde(default = "default_backoff_multiplier")]
    pub store_backoff_multiplier: f64,
}

fn default_retry_budget() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_store_initial_delay() -> u64 {
    500
}
fn default_store_max_delay() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            retry_delay_ms: default_retry_delay(),
            store_backoff_initial_ms: default_store_initial_delay(),
            store_backoff_max_ms: default_store_max_delay(),
            store_backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits between attempts
    pub fn immediate(retry_budget: u32) -> Self {
        Self {
            retry_budget,
            retry_delay_ms: 0,
            store_backoff_initial_ms: 0,
            store_backoff_max_ms: 0,
            ..Default::default()
        }
    }

    /// Whether attempt number `attempt` (1-indexed) may be followed by another
    pub fn should_retry(&self, kind: FailureKind, retryable: bool, attempt: u32) -> bool {
        if attempt > self.retry_budget {
            return false;
        }
        match kind {
            FailureKind::Execution => retryable,
            FailureKind::Store => true,
            _ => false,
        }
    }

    /// Delay before the attempt following `attempt`
    pub fn delay_for(&self, kind: FailureKind, attempt: u32) -> Duration {
        match kind {
            FailureKind::Store => self.store_delay_for_attempt(attempt),
            _ => Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Exponential store backoff for a specific attempt (1-indexed)
    pub fn store_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.store_backoff_initial_ms.min(self.store_backoff_max_ms));
        }

        let delay = self.store_backoff_initial_ms as f64
            * self.store_backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.store_backoff_max_ms as f64) as u64;
        Duration::from_millis(capped)
    }
}
