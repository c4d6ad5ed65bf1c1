//! Round runner: one attempt of one round.
//!
//! Invokes the executor, validates its output, persists the artifact and
//! reports what happened as a `RoundOutcome`. Every failure is classified
//! here; nothing unclassified reaches the orchestrator. Persistence only
//! happens on the success path, at most once per invocation.
//!
//! A store failure hands the validated output back so the write alone can
//! be repeated with `persist`, without calling the executor again.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::artifact_store::{ArtifactStore, StoreError};
use super::validator::{ValidationError, Validator};
use crate::adapters::{ExecutionError, RoundExecutor, RoundInput};
use crate::domain::{FailureKind, RoundId, RoundOutput, StoreReceipt};

/// Result of one round attempt
#[derive(Debug)]
pub struct RoundOutcome {
    pub round: RoundId,
    pub pipeline_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: Result<RoundSuccess, RoundFailure>,
}

impl RoundOutcome {
    pub fn ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Failure classification, if the attempt failed
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.result.as_ref().err().map(RoundFailure::kind)
    }

    /// Time spent in this attempt
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// A validated, persisted round output
#[derive(Debug, Clone)]
pub struct RoundSuccess {
    pub output: RoundOutput,
    pub receipt: StoreReceipt,
}

/// Why a round attempt failed
#[derive(Debug, thiserror::Error)]
pub enum RoundFailure {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The output was valid but could not be written
    #[error("{source}")]
    Store {
        #[source]
        source: StoreError,
        output: Box<RoundOutput>,
    },
}

impl RoundFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            RoundFailure::Execution(_) => FailureKind::Execution,
            RoundFailure::Validation(_) => FailureKind::Validation,
            RoundFailure::Store { .. } => FailureKind::Store,
        }
    }
}

/// Wraps executor calls with timing, validation and persistence
#[derive(Clone)]
pub struct RoundRunner {
    validator: Validator,
    store: Arc<dyn ArtifactStore>,
}

impl RoundRunner {
    pub fn new(validator: Validator, store: Arc<dyn ArtifactStore>) -> Self {
        Self { validator, store }
    }

    /// The store artifacts are written to
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Run one attempt of `input.round` for `input.run_id`
    pub async fn run(
        &self,
        input: RoundInput,
        executor: Arc<dyn RoundExecutor>,
        timeout: Duration,
    ) -> RoundOutcome {
        let round = input.round;
        let pipeline_id = input.run_id;
        let started_at = Utc::now();

        let result = self.attempt(input, executor, timeout).await;

        let finished_at = Utc::now();
        match &result {
            Ok(success) => debug!(
                %round,
                %pipeline_id,
                location = %success.receipt.location,
                "Round artifact persisted"
            ),
            Err(e) => warn!(%round, %pipeline_id, kind = %e.kind(), error = %e, "Round attempt failed"),
        }

        RoundOutcome {
            round,
            pipeline_id,
            started_at,
            finished_at,
            result,
        }
    }

    async fn attempt(
        &self,
        input: RoundInput,
        executor: Arc<dyn RoundExecutor>,
        timeout: Duration,
    ) -> Result<RoundSuccess, RoundFailure> {
        let round = input.round;
        let pipeline_id = input.run_id;
        let upstream = input.upstream.clone();

        let raw = execute_isolated(input, executor, timeout).await?;
        let output = self.validator.validate_in_context(round, &raw, &upstream)?;
        self.write(pipeline_id, output).await
    }

    /// Write an already validated output again after a store failure
    pub async fn persist(&self, pipeline_id: Uuid, output: RoundOutput) -> RoundOutcome {
        let round = output.round();
        let started_at = Utc::now();

        let result = self.write(pipeline_id, output).await;

        let finished_at = Utc::now();
        if let Err(e) = &result {
            warn!(%round, %pipeline_id, error = %e, "Artifact write retry failed");
        }

        RoundOutcome {
            round,
            pipeline_id,
            started_at,
            finished_at,
            result,
        }
    }

    async fn write(&self, pipeline_id: Uuid, output: RoundOutput) -> Result<RoundSuccess, RoundFailure> {
        match self.store.put(pipeline_id, output.round(), output.payload()).await {
            Ok(receipt) => Ok(RoundSuccess { output, receipt }),
            Err(source) => Err(RoundFailure::Store {
                source,
                output: Box::new(output),
            }),
        }
    }
}

/// Run the executor on its own task so a panic or hang stays contained.
///
/// On timeout the task is left to finish on its own; its result is dropped.
async fn execute_isolated(
    input: RoundInput,
    executor: Arc<dyn RoundExecutor>,
    timeout: Duration,
) -> Result<serde_json::Value, ExecutionError> {
    let handle = tokio::spawn(async move { executor.execute(&input).await });

    match tokio::time::timeout(timeout, handle).await {
        Err(_) => Err(ExecutionError::Timeout(timeout)),
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) if join_err.is_panic() => {
            Err(ExecutionError::Panicked(panic_message(join_err.into_panic())))
        }
        Ok(Err(join_err)) => Err(ExecutionError::Failed(join_err.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
