//! roundwork - Round-based article generation pipeline
//!
//! Turns a topic into a published article by running a fixed sequence of
//! rounds: trends, ideation, angle selection, section drafting, metadata,
//! polish and publish. Each round's output is validated against its
//! contract and persisted before the next round starts.
//!
//! # Architecture
//!
//! - Every round output is checked by the validator before it is stored
//! - Artifacts are keyed by (run, round) and written with upsert semantics
//! - A run always ends succeeded, failed or aborted, and stays there
//!
//! # Modules
//!
//! - `adapters`: Round executors (Fabric, HTTP)
//! - `core`: Orchestration logic (Validator, ArtifactStore, Runner, Registry)
//! - `domain`: Data structures (RoundId, contracts, PipelineRun)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Generate an article
//! roundwork run "electric bikes"
//!
//! # Check run status
//! roundwork status <run-id>
//!
//! # Read what a round produced
//! roundwork artifact <run-id> metadata
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{ExecutionError, ExecutorRegistry, RoundExecutor, RoundInput};
pub use core::Orchestrator;
pub use domain::{ArticleRequest, ArticleResponse, PipelineRun, RoundId, RoundOutput, RunStatus};
