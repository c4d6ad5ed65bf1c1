//! Round executors.
//!
//! An executor performs the actual transformation for one round (usually
//! a generation call). It takes a structured `RoundInput` and returns raw
//! JSON or fails. Executors never persist anything; that is the runner's
//! job. They must tolerate being invoked more than once for the same input.

pub mod fabric;
pub mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{RoundId, RoundOutput, Topic};

pub use fabric::FabricExecutor;
pub use http::HttpExecutor;

/// Structured input handed to a round executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundInput {
    /// Run this round belongs to
    pub run_id: Uuid,

    /// Round being executed
    pub round: RoundId,

    /// Seed topic of the run
    pub topic: Topic,

    /// Caller-supplied parameters (tone hints, word targets, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Outputs of exactly the round's declared dependencies, in order
    pub upstream: Vec<RoundOutput>,
}

impl RoundInput {
    /// Output of an upstream round, if it was provided
    pub fn upstream(&self, round: RoundId) -> Option<&RoundOutput> {
        self.upstream.iter().find(|o| o.round() == round)
    }
}

/// Failure inside a round executor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Executor timed out after {0:?}")]
    Timeout(Duration),

    #[error("Executor transport failure: {0}")]
    Transport(String),

    #[error("Executor returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("Executor failed: {0}")]
    Failed(String),

    #[error("Executor panicked: {0}")]
    Panicked(String),

    #[error("No executor registered for round '{0}'")]
    NotRegistered(RoundId),
}

/// Performs one round's transformation
#[async_trait]
pub trait RoundExecutor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Run the round on `input`, returning unvalidated JSON
    async fn execute(&self, input: &RoundInput) -> Result<serde_json::Value, ExecutionError>;
}

/// Explicit round -> executor table, built once at startup
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<RoundId, Arc<dyn RoundExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for a round
    pub fn register(mut self, round: RoundId, executor: Arc<dyn RoundExecutor>) -> Self {
        self.executors.insert(round, executor);
        self
    }

    /// Use one executor for every round
    pub fn uniform(executor: Arc<dyn RoundExecutor>) -> Self {
        RoundId::ALL
            .iter()
            .fold(Self::new(), |reg, round| reg.register(*round, executor.clone()))
    }

    pub fn get(&self, round: RoundId) -> Option<Arc<dyn RoundExecutor>> {
        self.executors.get(&round).cloned()
    }

    /// Rounds with no executor registered, in round order
    pub fn missing(&self) -> Vec<RoundId> {
        RoundId::ALL
            .iter()
            .copied()
            .filter(|r| !self.executors.contains_key(r))
            .collect()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for round in RoundId::ALL {
            if let Some(exec) = self.executors.get(&round) {
                map.entry(&round.name(), &exec.name());
            }
        }
        map.finish()
    }
}

/// Pull a JSON value out of generated text.
///
/// Generation backends often wrap JSON in markdown fences or add a line of
/// prose around it; take the outermost object.
pub fn parse_json_output(raw: &str) -> Result<serde_json::Value, ExecutionError> {
    let trimmed = strip_code_fences(raw.trim());

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end])
            .map_err(|e| ExecutionError::MalformedOutput(e.to_string())),
        _ => Err(ExecutionError::MalformedOutput(
            "no JSON object found in output".to_string(),
        )),
    }
}

fn strip_code_fences(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening fence
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RoundExecutor for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, input: &RoundInput) -> Result<serde_json::Value, ExecutionError> {
            Ok(json!({"round": input.round}))
        }
    }

    #[test]
    fn test_registry_missing_rounds() {
        let reg = ExecutorRegistry::new().register(RoundId::Trends, Arc::new(Echo));
        assert_eq!(reg.missing().len(), RoundId::ALL.len() - 1);
        assert!(reg.get(RoundId::Trends).is_some());

        let full = ExecutorRegistry::uniform(Arc::new(Echo));
        assert!(full.missing().is_empty());
    }

    #[test]
    fn test_parse_plain_json() {
        let v = parse_json_output(r#"{"link": "https://x"}"#).unwrap();
        assert_eq!(v["link"], "https://x");
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"ideas\": []}\n```\n";
        let v = parse_json_output(raw).unwrap();
        assert_eq!(v, json!({"ideas": []}));
    }

    #[test]
    fn test_parse_json_with_prose() {
        let raw = "Here is the result:\n{\"title\": \"E-bikes\"}\nHope it helps.";
        let v = parse_json_output(raw).unwrap();
        assert_eq!(v["title"], "E-bikes");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_json_output("no json here"),
            Err(ExecutionError::MalformedOutput(_))
        ));
    }
}
