//! Pipeline Integration Tests
//!
//! End-to-end runs through all seven rounds with a scripted executor.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{harness, harness_with_plan, Script, ScriptedExecutor};
use roundwork::adapters::{ExecutionError, ExecutorRegistry};
use roundwork::core::{
    ArtifactStore, InMemoryArtifactStore, InMemoryRunRegistry, Orchestrator, PipelinePlan,
    RetryPolicy, RunLimits, RunRegistry,
};
use roundwork::domain::{
    ArticleRequest, ArticleResponse, FailureKind, RoundId, RoundOutput, RunStatus, Topic,
};
use serde_json::json;

#[tokio::test]
async fn test_full_run_publishes() {
    let h = harness(ScriptedExecutor::new());

    let response = h
        .orchestrator
        .submit(ArticleRequest::new("electric bikes"))
        .await;

    match &response {
        ArticleResponse::Published {
            title,
            sections,
            link,
            ..
        } => {
            assert_eq!(title, "Choosing Your First Electric Bike");
            assert_eq!(sections.len(), 2);
            assert!(!link.is_empty());
        }
        other => panic!("expected published response, got {:?}", other),
    }

    let run_id = response.run_id();
    for round in RoundId::ALL {
        assert!(
            h.store.get(run_id, round).await.unwrap().is_some(),
            "missing artifact for {}",
            round
        );
    }

    let run = h.orchestrator.run_status(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.context.rounds(), RoundId::ALL.to_vec());
    assert!(run.finished_at.is_some());
    assert!(run.error.is_none());
    assert_eq!(run.trace.len(), 7);

    // Ideation sees the trends output exactly as produced
    let calls = h.executor.calls();
    assert_eq!(calls[1].round, RoundId::Ideation);
    match calls[1].upstream(RoundId::Trends) {
        Some(RoundOutput::Trends(trends)) => {
            assert_eq!(trends.suggestions[0].topic, "electric bikes");
            assert_eq!(trends.suggestions[0].score, 0.9);
        }
        other => panic!("expected trends upstream, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rounds_receive_only_declared_upstream() {
    let h = harness(ScriptedExecutor::new());

    let run = h
        .orchestrator
        .run_pipeline(ArticleRequest::new("electric bikes").with_param("audience", json!("commuters")))
        .await;
    assert_eq!(run.status, RunStatus::Succeeded);

    let calls = h.executor.calls();
    let order: Vec<RoundId> = calls.iter().map(|c| c.round).collect();
    assert_eq!(order, RoundId::ALL.to_vec());

    for call in &calls {
        let upstream: Vec<RoundId> = call.upstream.iter().map(|o| o.round()).collect();
        assert_eq!(upstream, call.round.dependencies().to_vec(), "round {}", call.round);
        assert_eq!(call.run_id, run.run_id);
        assert_eq!(call.params["audience"], "commuters");
    }
}

#[tokio::test]
async fn test_candidate_topics_are_passed_through() {
    let h = harness(ScriptedExecutor::new());
    let topic = Topic::from(vec!["electric bikes".to_string(), "folding bikes".to_string()]);

    let run = h.orchestrator.run_pipeline(ArticleRequest::new(topic.clone())).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(h.executor.calls()[0].topic, topic);
}

#[tokio::test]
async fn test_failure_stops_the_run() {
    let executor = ScriptedExecutor::new().script(
        RoundId::SectionDrafting,
        Script::Fail(ExecutionError::Failed("model refused".into())),
    );
    let h = harness(executor);

    let run = h.orchestrator.run_pipeline(ArticleRequest::new("electric bikes")).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.current_round, Some(RoundId::SectionDrafting));
    let error = run.error.as_ref().unwrap();
    assert_eq!(error.round, Some(RoundId::SectionDrafting));
    assert_eq!(error.kind, FailureKind::Execution);
    assert!(error.message.contains("model refused"));

    // Earlier rounds keep their artifacts, the failed round and later ones have none
    for round in RoundId::ALL {
        let stored = h.store.get(run.run_id, round).await.unwrap();
        assert_eq!(stored.is_some(), round.index() < RoundId::SectionDrafting.index(), "{}", round);
    }

    assert_eq!(h.executor.calls_for(RoundId::Metadata), 0);
    assert_eq!(h.executor.calls_for(RoundId::Publish), 0);

    match ArticleResponse::from_run(&run) {
        ArticleResponse::Failed { round, kind, .. } => {
            assert_eq!(round, Some(RoundId::SectionDrafting));
            assert_eq!(kind, FailureKind::Execution);
        }
        other => panic!("expected failed response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_output_is_never_persisted() {
    let executor = ScriptedExecutor::new().script(
        RoundId::Metadata,
        Script::Return(json!({
            "title": "Choosing Your First Electric Bike",
            "slug": "Not A Slug!",
            "description": "short"
        })),
    );
    let h = harness(executor);

    let run = h.orchestrator.run_pipeline(ArticleRequest::new("electric bikes")).await;

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.unwrap();
    assert_eq!(error.kind, FailureKind::Validation);
    assert!(error.message.contains("/slug"));

    assert!(h.store.get(run.run_id, RoundId::Metadata).await.unwrap().is_none());
    assert!(!run.context.contains(RoundId::Metadata));
    // Validation failures are not retried
    assert_eq!(h.executor.calls_for(RoundId::Metadata), 1);
}

#[tokio::test]
async fn test_angle_must_reference_an_ideation_idea() {
    let executor = ScriptedExecutor::new().script(
        RoundId::AngleSelection,
        Script::Return(json!({
            "idea_id": "idea-9",
            "angle": "Something else entirely",
            "audience": "everyone",
            "tone": "informative",
            "outline": ["Intro"]
        })),
    );
    let h = harness(executor);

    let run = h.orchestrator.run_pipeline(ArticleRequest::new("electric bikes")).await;

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.unwrap();
    assert_eq!(error.round, Some(RoundId::AngleSelection));
    assert_eq!(error.kind, FailureKind::Validation);
    assert!(error.message.contains("idea-9"));
}

#[tokio::test]
async fn test_empty_topic_fails_without_invoking_rounds() {
    let h = harness(ScriptedExecutor::new());

    let response = h.orchestrator.submit(ArticleRequest::new("   ")).await;

    match response {
        ArticleResponse::Failed { round, kind, .. } => {
            assert_eq!(round, None);
            assert_eq!(kind, FailureKind::Input);
        }
        other => panic!("expected failed response, got {:?}", other),
    }
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_before_execution_aborts() {
    let h = harness(ScriptedExecutor::new());
    let request = ArticleRequest::new("electric bikes");

    let run = h.orchestrator.start(&request).await.unwrap();
    h.orchestrator.cancel(run.run_id).await.unwrap();
    let run = h.orchestrator.execute(run, request).await;

    assert_eq!(run.status, RunStatus::Aborted);
    assert!(run.abort_reason.unwrap().contains("cancelled"));
    assert!(h.executor.calls().is_empty());
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_cancel_mid_run_finishes_current_round_then_aborts() {
    let registry = Arc::new(InMemoryRunRegistry::new());
    let store = Arc::new(InMemoryArtifactStore::new());

    let hook_registry = registry.clone();
    let executor = Arc::new(ScriptedExecutor::new().on_call(move |input| {
        if input.round == RoundId::Ideation {
            hook_registry.cancellation_token(input.run_id).cancel();
        }
    }));

    let orchestrator = Orchestrator::new(
        PipelinePlan::standard(),
        Arc::new(ExecutorRegistry::uniform(executor.clone())),
        store.clone() as Arc<dyn ArtifactStore>,
        registry.clone() as Arc<dyn RunRegistry>,
    )
    .unwrap();

    let response = orchestrator.submit(ArticleRequest::new("electric bikes")).await;

    match &response {
        ArticleResponse::Aborted { round, .. } => assert_eq!(*round, Some(RoundId::Ideation)),
        other => panic!("expected aborted response, got {:?}", other),
    }

    let run = registry.get(response.run_id()).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.context.rounds(), vec![RoundId::Trends, RoundId::Ideation]);
    assert!(store.get(run.run_id, RoundId::Ideation).await.unwrap().is_some());
    assert_eq!(executor.calls_for(RoundId::AngleSelection), 0);
}

#[tokio::test]
async fn test_run_timeout_aborts() {
    let mut plan = PipelinePlan::standard();
    plan.retry = RetryPolicy::immediate(0);
    plan.limits = RunLimits {
        run_timeout_seconds: 0,
        ..Default::default()
    };
    let h = harness_with_plan(ScriptedExecutor::new(), plan);

    let run = h.orchestrator.run_pipeline(ArticleRequest::new("electric bikes")).await;

    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.current_round, None);
    assert!(run.abort_reason.unwrap().contains("Run timeout"));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn test_retry_wait_stops_at_run_deadline() {
    let mut plan = PipelinePlan::standard();
    plan.retry = RetryPolicy {
        retry_delay_ms: 10_000,
        ..RetryPolicy::immediate(2)
    };
    plan.limits = RunLimits {
        run_timeout_seconds: 1,
        ..Default::default()
    };
    let executor = ScriptedExecutor::new().script(
        RoundId::Trends,
        Script::FailTimes(1, ExecutionError::Transport("connection reset".into())),
    );
    let h = harness_with_plan(executor, plan);

    let started = Instant::now();
    let run = h.orchestrator.run_pipeline(ArticleRequest::new("electric bikes")).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.current_round, Some(RoundId::Trends));
    assert!(run.abort_reason.unwrap().contains("Run timeout"));
    assert_eq!(h.executor.calls_for(RoundId::Trends), 1);
}

#[tokio::test]
async fn test_terminal_run_is_not_rewritten() {
    let h = harness(ScriptedExecutor::new());

    let run = h.orchestrator.run_pipeline(ArticleRequest::new("electric bikes")).await;
    assert!(run.is_terminal());

    let mut tampered = run.clone();
    tampered.status = RunStatus::Running;
    assert!(h.registry.update_status(&tampered).await.is_err());

    let stored = h.orchestrator.run_status(run.run_id).await.unwrap();
    assert_eq!(stored.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let h = Arc::new(harness(ScriptedExecutor::new()));

    let a = {
        let h = h.clone();
        tokio::spawn(async move { h.orchestrator.run_pipeline(ArticleRequest::new("electric bikes")).await })
    };
    let b = {
        let h = h.clone();
        tokio::spawn(async move { h.orchestrator.run_pipeline(ArticleRequest::new("folding bikes")).await })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.status, RunStatus::Succeeded);
    assert_eq!(b.status, RunStatus::Succeeded);
    assert_eq!(h.store.len().await, 14);

    let runs = h.orchestrator.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
}
