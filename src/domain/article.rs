//! Caller-facing request and response shapes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contracts::{Section, Topic};
use super::round::RoundId;
use super::run::{FailureKind, PipelineRun, RunStatus};

/// A request to generate one article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRequest {
    pub topic: Topic,

    /// Optional per-domain parameters passed through to every round
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ArticleRequest {
    pub fn new(topic: impl Into<Topic>) -> Self {
        Self {
            topic: topic.into(),
            params: serde_json::Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Outcome of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArticleResponse {
    Published {
        run_id: Uuid,
        title: String,
        sections: Vec<Section>,
        link: String,
    },
    Failed {
        run_id: Uuid,
        round: Option<RoundId>,
        kind: FailureKind,
        error: String,
    },
    Aborted {
        run_id: Uuid,
        round: Option<RoundId>,
        reason: String,
    },
}

impl ArticleResponse {
    /// Build the response for a terminal run
    pub fn from_run(run: &PipelineRun) -> Self {
        match run.status {
            RunStatus::Succeeded => {
                let metadata = run.context.get(RoundId::Metadata).and_then(|o| o.as_metadata());
                let polish = run.context.get(RoundId::Polish).and_then(|o| o.as_polish());
                let publish = run.context.get(RoundId::Publish).and_then(|o| o.as_publish());

                match (metadata, polish, publish) {
                    (Some(m), Some(p), Some(pb)) => ArticleResponse::Published {
                        run_id: run.run_id,
                        title: m.title.clone(),
                        sections: p.sections.clone(),
                        link: pb.link.clone(),
                    },
                    _ => ArticleResponse::Failed {
                        run_id: run.run_id,
                        round: run.current_round,
                        kind: FailureKind::Input,
                        error: "run succeeded but its context is missing final outputs".to_string(),
                    },
                }
            }
            RunStatus::Aborted => ArticleResponse::Aborted {
                run_id: run.run_id,
                round: run.current_round,
                reason: run
                    .abort_reason
                    .clone()
                    .unwrap_or_else(|| "aborted".to_string()),
            },
            _ => {
                let (round, kind, error) = match &run.error {
                    Some(e) => (e.round, e.kind, e.message.clone()),
                    None => (
                        run.current_round,
                        FailureKind::Input,
                        format!("run is not terminal (status: {})", run.status),
                    ),
                };
                ArticleResponse::Failed {
                    run_id: run.run_id,
                    round,
                    kind,
                    error,
                }
            }
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            ArticleResponse::Published { run_id, .. }
            | ArticleResponse::Failed { run_id, .. }
            | ArticleResponse::Aborted { run_id, .. } => *run_id,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, ArticleResponse::Published { .. })
    }
}
