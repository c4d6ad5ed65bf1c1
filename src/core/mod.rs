//! Core orchestration logic.
//!
//! This module contains:
//! - Validator: Round contract checks
//! - ArtifactStore: Persisted round outputs
//! - Runner: One attempt of one round
//! - Registry: Run records and cancellation
//! - Pipeline: Round plan and retry policy
//! - Limits: Run limits and enforcement
//! - Orchestrator: Main execution engine

pub mod artifact_store;
pub mod limits;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod validator;

// Re-export commonly used types
pub use artifact_store::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore, StoreError};
pub use limits::{LimitViolation, RunClock, RunLimits};
pub use orchestrator::Orchestrator;
pub use pipeline::{PipelinePlan, RetryPolicy, RoundOverride, RoundSpec};
pub use registry::{FileRunRegistry, InMemoryRunRegistry, RegistryError, RunRegistry};
pub use runner::{RoundFailure, RoundOutcome, RoundRunner, RoundSuccess};
pub use validator::{ValidationError, Validator};
