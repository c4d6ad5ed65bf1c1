//! Main orchestrator for pipeline runs.
//!
//! Walks the fixed round sequence for one run, threads accumulated context
//! forward, applies the retry policy and always leaves the run in a
//! terminal state. Rounds within a run are strictly sequential; separate
//! runs share nothing but the artifact store and the run registry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::artifact_store::{ArtifactStore, FileArtifactStore, StoreError};
use super::limits::{LimitViolation, RunClock};
use super::pipeline::{PipelinePlan, RoundSpec};
use super::registry::{FileRunRegistry, RegistryError, RunRegistry};
use super::runner::{RoundFailure, RoundOutcome, RoundRunner};
use super::validator::Validator;
use crate::adapters::{ExecutionError, ExecutorRegistry, FabricExecutor, HttpExecutor, RoundInput};
use crate::config::{ExecutorSettings, ResolvedConfig};
use crate::domain::{
    ArticleRequest, ArticleResponse, FailureKind, PipelineRun, RoundArtifact, RoundId, RoundOutput,
    RunError, RunStatus, TraceEntry,
};

/// Why a run stopped between rounds
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stop {
    Cancelled,
    Limit(LimitViolation),
}

impl Stop {
    fn reason(&self) -> String {
        match self {
            Stop::Cancelled => "cancelled by caller".to_string(),
            Stop::Limit(v) => v.to_string(),
        }
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    plan: PipelinePlan,
    executors: Arc<ExecutorRegistry>,
    runner: RoundRunner,
    registry: Arc<dyn RunRegistry>,
}

impl Orchestrator {
    /// Create an orchestrator. Fails if the plan is invalid or a round has
    /// no executor.
    pub fn new(
        plan: PipelinePlan,
        executors: Arc<ExecutorRegistry>,
        store: Arc<dyn ArtifactStore>,
        registry: Arc<dyn RunRegistry>,
    ) -> Result<Self> {
        plan.validate()?;

        let missing = executors.missing();
        if !missing.is_empty() {
            anyhow::bail!(
                "No executor registered for round(s): {}",
                missing.iter().map(|r| r.name()).collect::<Vec<_>>().join(", ")
            );
        }

        let validator = Validator::new(plan.limits.max_output_bytes);

        Ok(Self {
            plan,
            executors,
            runner: RoundRunner::new(validator, store),
            registry,
        })
    }

    /// Build an orchestrator from resolved configuration: file-backed
    /// store and registry, executor chosen by `executor` settings.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let executors = match &config.executor {
            ExecutorSettings::Fabric { binary } => {
                let mut fabric = match binary {
                    Some(path) => FabricExecutor::with_binary_path(path.clone()),
                    None => FabricExecutor::new(),
                };
                for (round, pattern) in &config.patterns {
                    fabric = fabric.with_pattern(*round, pattern.clone());
                }
                ExecutorRegistry::uniform(Arc::new(fabric))
            }
            ExecutorSettings::Http { base_url } => {
                ExecutorRegistry::uniform(Arc::new(HttpExecutor::new(base_url.clone())))
            }
        };

        let runs_dir = config.runs_dir();
        Self::new(
            config.plan.clone(),
            Arc::new(executors),
            Arc::new(FileArtifactStore::new(&runs_dir)),
            Arc::new(FileRunRegistry::new(&runs_dir)),
        )
        .context("Failed to build orchestrator from configuration")
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    pub fn registry(&self) -> &Arc<dyn RunRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        self.runner.store()
    }

    /// Caller-facing entry point: run a request to completion and shape
    /// the result.
    pub async fn submit(&self, request: ArticleRequest) -> ArticleResponse {
        let run = self.run_pipeline(request).await;
        ArticleResponse::from_run(&run)
    }

    /// Create a run and execute it. Always returns a terminal run.
    #[instrument(skip(self, request), fields(topic = %request.topic))]
    pub async fn run_pipeline(&self, request: ArticleRequest) -> PipelineRun {
        match self.start(&request).await {
            Ok(run) => self.execute(run, request).await,
            Err(e) => {
                error!(error = %e, "Failed to register run");
                let mut run = PipelineRun::new(Uuid::new_v4(), request.topic);
                run.status = RunStatus::Failed;
                run.finished_at = Some(Utc::now());
                run.error = Some(RunError {
                    round: None,
                    kind: FailureKind::Registry,
                    message: e.to_string(),
                });
                run
            }
        }
    }

    /// Register a pending run. Callers that want to cancel a run while it
    /// executes take its id from here, then call `execute`.
    pub async fn start(&self, request: &ArticleRequest) -> Result<PipelineRun, RegistryError> {
        let run = self.registry.create(request.topic.clone()).await?;
        info!(run_id = %run.run_id, "Run registered");
        Ok(run)
    }

    /// Execute a pending run through every round. Always returns a
    /// terminal run.
    #[instrument(skip(self, run, request), fields(run_id = %run.run_id))]
    pub async fn execute(&self, run: PipelineRun, request: ArticleRequest) -> PipelineRun {
        if run.status != RunStatus::Pending {
            warn!(status = %run.status, "Run is not pending, refusing to execute");
            return run;
        }

        let run_id = run.run_id;
        let run = self.drive(run, &request).await;
        self.registry.release(run_id);
        run
    }

    async fn drive(&self, mut run: PipelineRun, request: &ArticleRequest) -> PipelineRun {
        let cancel = self.registry.cancellation_token(run.run_id);
        let mut clock = RunClock::new();

        if request.topic.is_empty() {
            return self
                .fail(run, None, FailureKind::Input, "topic must not be empty".to_string())
                .await;
        }

        run.status = RunStatus::Running;
        self.record(&run).await;
        info!(topic = %run.topic, "Starting pipeline run");

        for spec in &self.plan.rounds {
            let round = spec.round;

            if let Some(stop) = self.should_stop(run.run_id, &cancel, &clock).await {
                return self.abort(run, stop).await;
            }
            run.current_round = Some(round);
            self.record(&run).await;

            let input = match build_input(&run, round, request) {
                Ok(input) => input,
                Err(message) => return self.fail(run, Some(round), FailureKind::Input, message).await,
            };

            match self.run_round(&mut run, spec, input, &cancel, &mut clock).await {
                Ok(()) => {
                    clock.record_round();
                    debug!(%round, completed = clock.rounds_completed, "Round complete");
                }
                Err(RoundStop::Failed { kind, message }) => {
                    return self.fail(run, Some(round), kind, message).await;
                }
                Err(RoundStop::Stopped(stop)) => return self.abort(run, stop).await,
            }
        }

        self.succeed(run, &clock).await
    }

    /// Run one round, retrying per policy, and append its output to context.
    /// After a store failure only the write is repeated; the executor is not
    /// called again for output it already produced.
    async fn run_round(
        &self,
        run: &mut PipelineRun,
        spec: &RoundSpec,
        input: RoundInput,
        cancel: &CancellationToken,
        clock: &mut RunClock,
    ) -> Result<(), RoundStop> {
        let round = spec.round;
        let executor = self.executors.get(round).ok_or_else(|| RoundStop::Failed {
            kind: FailureKind::Execution,
            message: ExecutionError::NotRegistered(round).to_string(),
        })?;
        let timeout = spec.timeout(&self.plan.limits);
        let retry = &self.plan.retry;

        let mut attempt = 0u32;
        let mut unsaved: Option<RoundOutput> = None;

        loop {
            attempt += 1;

            let outcome = match unsaved.take() {
                Some(output) => {
                    debug!(%round, attempt, "Retrying artifact write");
                    self.runner.persist(run.run_id, output).await
                }
                None => {
                    clock.record_attempt();
                    debug!(%round, attempt, "Running round");
                    self.runner.run(input.clone(), executor.clone(), timeout).await
                }
            };
            run.trace.push(trace_entry(&outcome, attempt));
            debug!(%round, attempt, ok = outcome.ok(), duration_ms = outcome.duration_ms(), "Attempt finished");

            let failure = match outcome.result {
                Ok(success) => {
                    run.context.append(success.output);
                    return Ok(());
                }
                Err(failure) => failure,
            };

            let kind = failure.kind();
            if !retry.should_retry(kind, spec.retryable, attempt) {
                error!(%round, attempt, %kind, error = %failure, "Round failed permanently");
                return Err(RoundStop::Failed {
                    kind,
                    message: format!(
                        "Round '{}' failed after {} attempt(s): {}",
                        round, attempt, failure
                    ),
                });
            }

            let delay = retry.delay_for(kind, attempt);
            warn!(
                %round,
                attempt,
                %kind,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Round failed, retrying"
            );

            self.wait(delay, cancel, clock).await.map_err(RoundStop::Stopped)?;
            if let Some(stop) = self.should_stop(run.run_id, cancel, clock).await {
                return Err(RoundStop::Stopped(stop));
            }

            if let RoundFailure::Store { output, .. } = failure {
                unsaved = Some(*output);
            }
        }
    }

    /// Sleep before a retry; cancellation or the run deadline cuts the
    /// wait short
    async fn wait(&self, delay: Duration, cancel: &CancellationToken, clock: &RunClock) -> Result<(), Stop> {
        if delay.is_zero() {
            return Ok(());
        }
        let limits = &self.plan.limits;
        let remaining = limits.remaining(clock);
        tokio::select! {
            _ = cancel.cancelled() => Err(Stop::Cancelled),
            _ = tokio::time::sleep(remaining), if remaining < delay => {
                Err(Stop::Limit(limits.expired(clock)))
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Checked at every round boundary and after every retry wait
    async fn should_stop(&self, run_id: Uuid, cancel: &CancellationToken, clock: &RunClock) -> Option<Stop> {
        if cancel.is_cancelled() {
            return Some(Stop::Cancelled);
        }
        match self.registry.cancel_requested(run_id).await {
            Ok(true) => {
                cancel.cancel();
                return Some(Stop::Cancelled);
            }
            Ok(false) => {}
            Err(e) => warn!(%run_id, error = %e, "Failed to check for cancellation"),
        }
        self.plan.limits.check(clock).err().map(Stop::Limit)
    }

    /// Store the current snapshot; registry trouble is logged, not fatal
    async fn record(&self, run: &PipelineRun) {
        if let Err(e) = self.registry.update_status(run).await {
            warn!(run_id = %run.run_id, error = %e, "Failed to record run status");
        }
    }

    async fn succeed(&self, mut run: PipelineRun, clock: &RunClock) -> PipelineRun {
        run.status = RunStatus::Succeeded;
        run.finished_at = Some(Utc::now());
        info!(
            rounds = clock.rounds_completed,
            attempts = clock.attempts,
            elapsed_s = clock.elapsed_seconds(),
            "Run completed successfully"
        );
        self.record(&run).await;
        run
    }

    async fn fail(
        &self,
        mut run: PipelineRun,
        round: Option<RoundId>,
        kind: FailureKind,
        message: String,
    ) -> PipelineRun {
        error!(round = ?round, %kind, error = %message, "Run failed");
        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        run.error = Some(RunError { round, kind, message });
        self.record(&run).await;
        run
    }

    async fn abort(&self, mut run: PipelineRun, stop: Stop) -> PipelineRun {
        let reason = stop.reason();
        warn!(round = ?run.current_round, %reason, "Run aborted");
        run.status = RunStatus::Aborted;
        run.finished_at = Some(Utc::now());
        run.abort_reason = Some(reason);
        self.record(&run).await;
        run
    }

    /// Get status of a run by ID
    pub async fn run_status(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.registry
            .get(run_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Run {} not found", run_id))
    }

    /// List recent runs, most recent first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        Ok(self.registry.list(limit).await?)
    }

    /// Request cancellation of an in-flight run
    pub async fn cancel(&self, run_id: Uuid) -> Result<()> {
        Ok(self.registry.cancel(run_id).await?)
    }

    /// Read a persisted artifact; `Ok(None)` if the round never produced one
    pub async fn artifact(&self, run_id: Uuid, round: RoundId) -> Result<Option<RoundArtifact>, StoreError> {
        self.store().get(run_id, round).await
    }
}

/// Why `run_round` gave up
#[derive(Debug)]
enum RoundStop {
    Failed { kind: FailureKind, message: String },
    Stopped(Stop),
}

/// Assemble a round's input from exactly its declared upstream outputs
fn build_input(run: &PipelineRun, round: RoundId, request: &ArticleRequest) -> Result<RoundInput, String> {
    let upstream = round
        .dependencies()
        .iter()
        .map(|dep| {
            run.context.get(*dep).cloned().ok_or_else(|| {
                format!(
                    "Round '{}' requires output of '{}' which is not in context",
                    round, dep
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RoundInput {
        run_id: run.run_id,
        round,
        topic: run.topic.clone(),
        params: request.params.clone(),
        upstream,
    })
}

fn trace_entry(outcome: &RoundOutcome, attempt: u32) -> TraceEntry {
    let (failure, error) = match &outcome.result {
        Ok(_) => (None, None),
        Err(e) => (Some(e.kind()), Some(e.to_string())),
    };

    TraceEntry {
        round: outcome.round,
        attempt,
        ok: outcome.ok(),
        failure,
        error,
        started_at: outcome.started_at,
        finished_at: outcome.finished_at,
    }
}
