//! Domain types for the roundwork orchestrator.
//!
//! This module contains the core data structures:
//! - Round: the fixed, ordered round identifiers
//! - Contracts: typed per-round outputs
//! - Run: pipeline run state and accumulated context
//! - Artifact: persisted round outputs
//! - Article: caller-facing request and response

pub mod article;
pub mod artifact;
pub mod contracts;
pub mod round;
pub mod run;

// Re-export commonly used types
pub use article::{ArticleRequest, ArticleResponse};
pub use artifact::{payload_checksum, RoundArtifact, StoreReceipt};
pub use contracts::{
    AngleOutput, DraftOutput, Idea, IdeationOutput, MetadataOutput, PolishOutput, PublishOutput,
    RoundOutput, Section, Tone, Topic, TrendSuggestion, TrendsOutput,
};
pub use round::{RoundId, UnknownRound};
pub use run::{FailureKind, PipelineRun, RunContext, RunError, RunStatus, TraceEntry};
