//! Configuration for roundwork.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (ROUNDWORK_HOME, ROUNDWORK_EXECUTOR_URL)
//! 2. Config file (.roundwork/config.yaml)
//! 3. Defaults (~/.roundwork, Fabric executor, standard plan)
//!
//! Config file discovery:
//! - Searches current directory and parents for .roundwork/config.yaml
//! - `paths.home` in the config file is relative to the .roundwork/ directory

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::limits::RunLimits;
use crate::core::pipeline::{PipelinePlan, RetryPolicy, RoundOverride};
use crate::domain::RoundId;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub executor: Option<ExecutorConfig>,
    #[serde(default)]
    pub limits: Option<RunLimits>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Per-round overrides keyed by round name or key ("publish", "r6")
    #[serde(default)]
    pub rounds: BTreeMap<String, RoundOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .roundwork/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    Fabric { binary: Option<String> },
    Http { base_url: String },
}

/// Which executor backs every round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorSettings {
    Fabric { binary: Option<String> },
    Http { base_url: String },
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        ExecutorSettings::Fabric { binary: None }
    }
}

impl From<ExecutorConfig> for ExecutorSettings {
    fn from(config: ExecutorConfig) -> Self {
        match config {
            ExecutorConfig::Fabric { binary } => ExecutorSettings::Fabric { binary },
            ExecutorConfig::Http { base_url } => ExecutorSettings::Http { base_url },
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to roundwork home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Executor selection
    pub executor: ExecutorSettings,
    /// Round plan with overrides applied
    pub plan: PipelinePlan,
    /// Fabric pattern overrides
    pub patterns: HashMap<RoundId, String>,
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with every default
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            home,
            config_file: None,
            executor: ExecutorSettings::default(),
            plan: PipelinePlan::standard(),
            patterns: HashMap::new(),
        }
    }

    /// Directory holding one subdirectory per run
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".roundwork").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file over the defaults
fn apply_config_file(
    mut resolved: ResolvedConfig,
    config: ConfigFile,
    config_path: &Path,
) -> Result<ResolvedConfig> {
    if let Some(ref home_path) = config.paths.home {
        let roundwork_dir = config_path.parent().unwrap_or(Path::new("."));
        resolved.home = resolve_path(roundwork_dir, home_path);
    }

    if let Some(executor) = config.executor {
        resolved.executor = executor.into();
    }

    let mut plan = PipelinePlan::standard();
    if let Some(limits) = config.limits {
        plan.limits = limits;
    }
    if let Some(retry) = config.retry {
        plan.retry = retry;
    }
    resolved.plan = plan.with_overrides(&config.rounds)?;

    for (name, ov) in &config.rounds {
        if let Some(ref pattern) = ov.pattern {
            let round: RoundId = name.parse()?;
            resolved.patterns.insert(round, pattern.clone());
        }
    }

    resolved.config_file = Some(config_path.to_path_buf());
    Ok(resolved)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".roundwork");

    let mut resolved = ResolvedConfig::with_home(default_home);

    if let Some(config_path) = find_config_file() {
        let config = load_config_file(&config_path)?;
        resolved = apply_config_file(resolved, config, &config_path)?;
    }

    if let Ok(env_home) = std::env::var("ROUNDWORK_HOME") {
        resolved.home = PathBuf::from(env_home);
    }

    if let Ok(url) = std::env::var("ROUNDWORK_EXECUTOR_URL") {
        resolved.executor = ExecutorSettings::Http { base_url: url };
    }

    Ok(resolved)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
