//! Pipeline run state.
//!
//! A `PipelineRun` is one end-to-end execution of the round sequence for a
//! single topic request. The orchestrator is its only writer; once the run
//! reaches a terminal status it is never changed again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contracts::{RoundOutput, Topic};
use super::round::RoundId;

/// A pipeline execution run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// Seed input
    pub topic: Topic,

    /// Lifecycle status
    pub status: RunStatus,

    /// Round in progress, or the last one attempted
    pub current_round: Option<RoundId>,

    /// Validated outputs of completed rounds
    pub context: RunContext,

    /// When the run was created
    pub started_at: DateTime<Utc>,

    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,

    /// Failure details (only when failed)
    pub error: Option<RunError>,

    /// Why the run was stopped (only when aborted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,

    /// One entry per round attempt
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
}

impl PipelineRun {
    /// Create a pending run
    pub fn new(run_id: Uuid, topic: Topic) -> Self {
        Self {
            run_id,
            topic,
            status: RunStatus::Pending,
            current_round: None,
            context: RunContext::default(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            abort_reason: None,
            trace: Vec::new(),
        }
    }

    /// Whether the run has reached succeeded, failed or aborted
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of attempts recorded for a round
    pub fn attempts(&self, round: RoundId) -> usize {
        self.trace.iter().filter(|t| t.round == round).count()
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Aborted)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Why a run stopped short
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    /// Round that was in progress (None if the run never got to one)
    pub round: Option<RoundId>,

    /// Classification of the failure
    pub kind: FailureKind,

    /// Human-readable diagnostic
    pub message: String,
}

/// Classification of a round or run failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The round executor failed (network, timeout, internal)
    Execution,

    /// The executor output violated the round contract
    Validation,

    /// The artifact store was unavailable
    Store,

    /// Input could not be assembled for a round
    Input,

    /// The run registry could not record the run
    Registry,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Execution => "execution",
            FailureKind::Validation => "validation",
            FailureKind::Store => "store",
            FailureKind::Input => "input",
            FailureKind::Registry => "registry",
        };
        f.write_str(s)
    }
}

/// Summary of one round attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub round: RoundId,

    /// 1-indexed attempt number
    pub attempt: u32,

    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Accumulated round outputs for a run.
///
/// Insertion-ordered and append-only: an entry, once added, is never
/// replaced or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    entries: Vec<RoundOutput>,
}

impl RunContext {
    /// Append a round's output. Returns false (and leaves the context
    /// untouched) if that round already has an entry.
    pub fn append(&mut self, output: RoundOutput) -> bool {
        if self.contains(output.round()) {
            return false;
        }
        self.entries.push(output);
        true
    }

    pub fn get(&self, round: RoundId) -> Option<&RoundOutput> {
        self.entries.iter().find(|o| o.round() == round)
    }

    pub fn contains(&self, round: RoundId) -> bool {
        self.get(round).is_some()
    }

    /// Rounds present, in insertion order
    pub fn rounds(&self) -> Vec<RoundId> {
        self.entries.iter().map(RoundOutput::round).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoundOutput> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contracts::{PublishOutput, TrendSuggestion, TrendsOutput};

    fn trends() -> RoundOutput {
        RoundOutput::Trends(TrendsOutput {
            suggestions: vec![TrendSuggestion {
                topic: "electric bikes".into(),
                score: 0.9,
                rationale: None,
            }],
        })
    }

    #[test]
    fn test_run_creation() {
        let run_id = Uuid::new_v4();
        let run = PipelineRun::new(run_id, Topic::from("electric bikes"));

        assert_eq!(run.run_id, run_id);
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.current_round.is_none());
        assert!(run.finished_at.is_none());
        assert!(!run.is_terminal());
    }

    #[test]
    fn test_context_is_append_only() {
        let mut ctx = RunContext::default();
        assert!(ctx.append(trends()));
        assert!(!ctx.append(trends()));
        assert_eq!(ctx.len(), 1);

        ctx.append(RoundOutput::Publish(PublishOutput {
            link: "https://x".into(),
            published_at: None,
        }));
        assert_eq!(ctx.rounds(), vec![RoundId::Trends, RoundId::Publish]);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_run_serialization() {
        let mut run = PipelineRun::new(Uuid::new_v4(), Topic::from("bikes"));
        run.context.append(trends());

        let json = serde_json::to_string(&run).unwrap();
        let parsed: PipelineRun = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, run);
    }
}
