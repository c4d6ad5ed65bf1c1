//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use roundwork::adapters::{ExecutionError, ExecutorRegistry, RoundExecutor, RoundInput};
use roundwork::core::{
    ArtifactStore, InMemoryArtifactStore, InMemoryRunRegistry, Orchestrator, PipelinePlan,
    RetryPolicy, RunRegistry,
};
use roundwork::domain::RoundId;

/// A contract-valid output for every round
pub fn valid_output(round: RoundId) -> Value {
    match round {
        RoundId::Trends => json!({
            "suggestions": [
                {"topic": "electric bikes", "score": 0.9, "rationale": "commuter interest is rising"},
                {"topic": "cargo e-bikes", "score": 0.71}
            ]
        }),
        RoundId::Ideation => json!({
            "ideas": [
                {
                    "id": "idea-1",
                    "title": "Are e-bikes worth it for a 10 km commute?",
                    "summary": "Cost, time and health compared with car and transit.",
                    "research_notes": ["average e-bike range is 40-80 km"]
                },
                {
                    "id": "idea-2",
                    "title": "Choosing your first electric bike",
                    "summary": "Motor placement, battery size and frame types explained."
                }
            ]
        }),
        RoundId::AngleSelection => json!({
            "idea_id": "idea-2",
            "angle": "A buyer's checklist for first-time riders",
            "audience": "urban commuters",
            "tone": "conversational",
            "outline": ["Why go electric", "Motor types", "Battery range", "Test ride tips"]
        }),
        RoundId::SectionDrafting => json!({
            "sections": [
                {"heading": "Why go electric", "body": "Hills stop being a problem."},
                {"heading": "Motor types", "body": "Hub motors are simple, mid-drives climb better."}
            ]
        }),
        RoundId::Metadata => json!({
            "title": "Choosing Your First Electric Bike",
            "slug": "choosing-your-first-electric-bike",
            "description": "A practical checklist for picking an e-bike that fits your commute.",
            "keywords": ["e-bike", "commuting"]
        }),
        RoundId::Polish => json!({
            "sections": [
                {"heading": "Why go electric", "body": "Hills stop being a problem, and so does arriving sweaty."},
                {"heading": "Motor types", "body": "Hub motors are simple; mid-drives climb better."}
            ],
            "word_count": 19
        }),
        RoundId::Publish => json!({
            "link": "https://blog.example.com/choosing-your-first-electric-bike",
            "published_at": "2026-10-19T09:00:00Z"
        }),
    }
}

/// How a scripted round behaves
#[derive(Debug, Clone)]
pub enum Script {
    /// Always fail with this error
    Fail(ExecutionError),
    /// Fail this many times, then succeed
    FailTimes(u32, ExecutionError),
    /// Return this value instead of a valid output
    Return(Value),
}

/// Executor that answers with canned outputs and records every input
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<RoundId, Script>,
    calls: Mutex<Vec<RoundInput>>,
    on_call: Mutex<Option<Box<dyn Fn(&RoundInput) + Send + Sync>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, round: RoundId, script: Script) -> Self {
        self.scripts.insert(round, script);
        self
    }

    /// Hook run at the start of every invocation
    pub fn on_call(self, hook: impl Fn(&RoundInput) + Send + Sync + 'static) -> Self {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
        self
    }

    /// Every input received, in call order
    pub fn calls(&self) -> Vec<RoundInput> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, round: RoundId) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| c.round == round).count()
    }
}

#[async_trait]
impl RoundExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, input: &RoundInput) -> Result<Value, ExecutionError> {
        if let Some(hook) = self.on_call.lock().unwrap().as_ref() {
            hook(input);
        }

        let previous = {
            let mut calls = self.calls.lock().unwrap();
            let previous = calls.iter().filter(|c| c.round == input.round).count() as u32;
            calls.push(input.clone());
            previous
        };

        match self.scripts.get(&input.round) {
            None => Ok(valid_output(input.round)),
            Some(Script::Fail(err)) => Err(err.clone()),
            Some(Script::FailTimes(n, err)) if previous < *n => Err(err.clone()),
            Some(Script::FailTimes(..)) => Ok(valid_output(input.round)),
            Some(Script::Return(value)) => Ok(value.clone()),
        }
    }
}

/// Everything a test needs to drive and inspect runs
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub executor: Arc<ScriptedExecutor>,
    pub store: Arc<InMemoryArtifactStore>,
    pub registry: Arc<InMemoryRunRegistry>,
}

/// In-memory orchestrator with no retry delays
pub fn harness(executor: ScriptedExecutor) -> Harness {
    let mut plan = PipelinePlan::standard();
    plan.retry = RetryPolicy::immediate(2);
    harness_with_plan(executor, plan)
}

pub fn harness_with_plan(executor: ScriptedExecutor, plan: PipelinePlan) -> Harness {
    let executor = Arc::new(executor);
    let store = Arc::new(InMemoryArtifactStore::new());
    let registry = Arc::new(InMemoryRunRegistry::new());

    let orchestrator = Orchestrator::new(
        plan,
        Arc::new(ExecutorRegistry::uniform(executor.clone())),
        store.clone() as Arc<dyn ArtifactStore>,
        registry.clone() as Arc<dyn RunRegistry>,
    )
    .unwrap();

    Harness {
        orchestrator,
        executor,
        store,
        registry,
    }
}
