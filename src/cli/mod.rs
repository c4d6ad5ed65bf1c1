//! Command-line interface for roundwork.
//!
//! Provides commands for running the article pipeline, checking status,
//! cancelling runs, listing runs and reading persisted round artifacts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config;
use crate::core::Orchestrator;
use crate::domain::{ArticleRequest, ArticleResponse, RoundId, RunStatus, Topic};

/// roundwork - Round-based article generation pipeline
#[derive(Parser, Debug)]
#[command(name = "roundwork")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate and publish an article
    Run {
        /// Topic, or several candidate topics
        #[arg(required = true)]
        topic: Vec<String>,

        /// Extra request parameter passed to every round (key=value)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// Cancel an in-flight run; it stops at the next round boundary
    Cancel {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Print the persisted artifact of one round
    Artifact {
        /// Run ID (UUID)
        run_id: String,

        /// Round name or key (e.g. "metadata" or "r4")
        round: String,
    },

    /// List the rounds in execution order
    Rounds,

    /// Show current configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { topic, params } => run_article(topic, params).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Cancel { run_id } => cancel_run(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Artifact { run_id, round } => show_artifact(&run_id, &round).await,
            Commands::Rounds => list_rounds(),
            Commands::Config => show_config(),
        }
    }
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty parameter name in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn orchestrator() -> Result<Orchestrator> {
    Orchestrator::from_config(config::config()?)
}

fn parse_run_id(run_id_str: &str) -> Result<Uuid> {
    Uuid::parse_str(run_id_str).with_context(|| format!("Invalid run ID: {}", run_id_str))
}

/// Run the pipeline for a topic and print the response
async fn run_article(topic: Vec<String>, params: Vec<(String, String)>) -> Result<()> {
    let topic = match <[String; 1]>::try_from(topic) {
        Ok([single]) => Topic::Single(single),
        Err(many) => Topic::Candidates(many),
    };

    let mut request = ArticleRequest::new(topic);
    for (key, value) in params {
        request = request.with_param(key, serde_json::Value::String(value));
    }

    let orchestrator = orchestrator()?;
    let response = orchestrator.submit(request).await;

    println!("{}", serde_json::to_string_pretty(&response)?);

    match &response {
        ArticleResponse::Published { run_id, link, .. } => {
            eprintln!("\n[Run {} published: {}]", run_id, link);
        }
        ArticleResponse::Failed {
            run_id, round, error, ..
        } => {
            let at = round.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string());
            eprintln!("\n[Run {} failed at {}: {}]", run_id, at, error);
            std::process::exit(1);
        }
        ArticleResponse::Aborted { run_id, reason, .. } => {
            eprintln!("\n[Run {} aborted: {}]", run_id, reason);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    let run = orchestrator()?.run_status(run_id).await?;

    println!("Run ID: {}", run.run_id);
    println!("Topic: {}", run.topic);
    println!("Status: {}", run.status);
    println!("Started: {}", run.started_at);
    if let Some(finished) = run.finished_at {
        println!("Finished: {}", finished);
    }
    if let Some(round) = run.current_round {
        println!("Current round: {} ({})", round, round.key());
    }
    if let Some(ref error) = run.error {
        println!("Error: [{}] {}", error.kind, error.message);
    }
    if let Some(ref reason) = run.abort_reason {
        println!("Aborted: {}", reason);
    }

    println!("\nRounds:");
    for round in RoundId::ALL {
        let state = if run.context.contains(round) {
            "done".to_string()
        } else if run.current_round == Some(round) && run.status != RunStatus::Succeeded {
            run.status.to_string()
        } else {
            "-".to_string()
        };
        let attempts = run.attempts(round);
        if attempts > 1 {
            println!("  {:<18} {} ({} attempts)", round.name(), state, attempts);
        } else {
            println!("  {:<18} {}", round.name(), state);
        }
    }

    Ok(())
}

/// Request cancellation of a run
async fn cancel_run(run_id_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    let orchestrator = orchestrator()?;
    let run = orchestrator.run_status(run_id).await?;

    if run.is_terminal() {
        println!("Run {} already {}", run_id, run.status);
        return Ok(());
    }

    orchestrator.cancel(run_id).await?;
    println!("Cancellation requested for run {}", run_id);
    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let runs = orchestrator()?.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<11} {:<18} {:<30}", "RUN ID", "STATUS", "ROUND", "TOPIC");
    println!("{}", "-".repeat(97));

    for run in runs {
        let round = run.current_round.map(|r| r.name()).unwrap_or("-");
        let mut topic = run.topic.to_string();
        if topic.chars().count() > 30 {
            topic = topic.chars().take(27).collect::<String>() + "...";
        }
        println!("{:<38} {:<11} {:<18} {:<30}", run.run_id, run.status, round, topic);
    }

    Ok(())
}

/// Print a round's artifact payload
async fn show_artifact(run_id_str: &str, round_str: &str) -> Result<()> {
    let run_id = parse_run_id(run_id_str)?;
    let round: RoundId = round_str.parse()?;

    let artifact = orchestrator()?
        .artifact(run_id, round)
        .await?
        .with_context(|| format!("No artifact for round '{}' of run {}", round, run_id))?;

    eprintln!(
        "[{} {} persisted {} checksum {}]",
        artifact.round.key(),
        artifact.round,
        artifact.persisted_at,
        artifact.checksum
    );
    println!("{}", serde_json::to_string_pretty(&artifact.payload)?);

    Ok(())
}

fn list_rounds() -> Result<()> {
    println!("{:<5} {:<18} {:<10} {}", "KEY", "ROUND", "RETRYABLE", "DEPENDS ON");
    println!("{}", "-".repeat(70));
    for round in RoundId::ALL {
        let deps = round
            .dependencies()
            .iter()
            .map(|d| d.name())
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<5} {:<18} {:<10} {}",
            round.key(),
            round.name(),
            round.retryable_by_default(),
            if deps.is_empty() { "-".to_string() } else { deps }
        );
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("roundwork configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home: {}", cfg.home.display());
    println!("  Runs: {}", cfg.runs_dir().display());
    println!();
    match &cfg.executor {
        config::ExecutorSettings::Fabric { binary } => {
            println!("Executor: fabric ({})", binary.as_deref().unwrap_or("auto-detect"));
        }
        config::ExecutorSettings::Http { base_url } => {
            println!("Executor: http ({})", base_url);
        }
    }
    println!();
    println!("Limits:");
    println!("  Round timeout: {}s", cfg.plan.limits.round_timeout_seconds);
    println!("  Run timeout:   {}s", cfg.plan.limits.run_timeout_seconds);
    println!("  Max output:    {} bytes", cfg.plan.limits.max_output_bytes);
    println!();
    println!("Retry:");
    println!("  Budget: {}", cfg.plan.retry.retry_budget);
    println!("  Delay:  {}ms", cfg.plan.retry.retry_delay_ms);
    println!();
    println!("Rounds:");
    for spec in &cfg.plan.rounds {
        let timeout = spec.timeout(&cfg.plan.limits).as_secs();
        match cfg.patterns.get(&spec.round) {
            Some(pattern) => println!(
                "  {:<18} retryable={:<5} timeout={}s pattern={}",
                spec.round.name(),
                spec.retryable,
                timeout,
                pattern
            ),
            None => println!(
                "  {:<18} retryable={:<5} timeout={}s",
                spec.round.name(),
                spec.retryable,
                timeout
            ),
        }
    }
    println!();
    println!("Environment overrides:");
    println!("  ROUNDWORK_HOME         - Override home directory");
    println!("  ROUNDWORK_EXECUTOR_URL - Use the HTTP executor at this base URL");

    Ok(())
}
