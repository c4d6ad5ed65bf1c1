//! Fabric executor for round generation.
//!
//! Runs the `fabric` CLI as a subprocess: the round input is written to
//! stdin as JSON and the pattern's stdout is parsed back as JSON. Each
//! round maps to one Fabric pattern.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{parse_json_output, ExecutionError, RoundExecutor, RoundInput};
use crate::domain::RoundId;

/// Default pattern name for a round ("roundwork_section_drafting", ...)
pub fn default_pattern(round: RoundId) -> String {
    format!("roundwork_{}", round.name().replace('-', "_"))
}

/// Executor that shells out to Fabric patterns
pub struct FabricExecutor {
    /// Path to the fabric binary (default: "fabric")
    binary_path: String,

    /// Pattern overrides per round
    patterns: HashMap<RoundId, String>,
}

impl Default for FabricExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricExecutor {
    /// Create an executor with the default binary
    ///
    /// Looks for fabric-ai first (Homebrew install), falls back to fabric
    pub fn new() -> Self {
        let binary_path = if std::process::Command::new("fabric-ai")
            .arg("--help")
            .output()
            .is_ok()
        {
            "fabric-ai".to_string()
        } else {
            "fabric".to_string()
        };

        Self::with_binary_path(binary_path)
    }

    /// Create an executor with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            patterns: HashMap::new(),
        }
    }

    /// Override the pattern used for a round
    pub fn with_pattern(mut self, round: RoundId, pattern: impl Into<String>) -> Self {
        self.patterns.insert(round, pattern.into());
        self
    }

    /// Pattern that will run for `round`
    pub fn pattern_for(&self, round: RoundId) -> String {
        self.patterns
            .get(&round)
            .cloned()
            .unwrap_or_else(|| default_pattern(round))
    }

    async fn run_pattern(&self, pattern: &str, input: &str) -> Result<String, ExecutionError> {
        let mut child = Command::new(&self.binary_path)
            .args(["-p", pattern])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::Transport(format!(
                    "failed to spawn {} for pattern '{}': {}",
                    self.binary_path, pattern, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| ExecutionError::Transport(format!("failed to write to fabric stdin: {}", e)))?;
            // Drop stdin to signal EOF
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutionError::Transport(format!("failed to wait for fabric: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(ExecutionError::Failed(format!(
                "fabric pattern '{}' exited with code {}: {}",
                pattern,
                exit_code,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| ExecutionError::MalformedOutput("fabric output is not valid UTF-8".to_string()))
    }
}

#[async_trait]
impl RoundExecutor for FabricExecutor {
    fn name(&self) -> &str {
        "fabric"
    }

    async fn execute(&self, input: &RoundInput) -> Result<serde_json::Value, ExecutionError> {
        let pattern = self.pattern_for(input.round);
        let body = serde_json::to_string(input)
            .map_err(|e| ExecutionError::Failed(format!("failed to encode round input: {}", e)))?;

        debug!(round = %input.round, %pattern, bytes = body.len(), "Invoking fabric pattern");

        let stdout = self.run_pattern(&pattern, &body).await?;
        parse_json_output(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns() {
        assert_eq!(default_pattern(RoundId::Trends), "roundwork_trends");
        assert_eq!(
            default_pattern(RoundId::AngleSelection),
            "roundwork_angle_selection"
        );
    }

    #[test]
    fn test_pattern_override() {
        let exec = FabricExecutor::with_binary_path("/custom/path/fabric")
            .with_pattern(RoundId::Publish, "my_publisher");

        assert_eq!(exec.binary_path, "/custom/path/fabric");
        assert_eq!(exec.pattern_for(RoundId::Publish), "my_publisher");
        assert_eq!(exec.pattern_for(RoundId::Polish), "roundwork_polish");
    }

    #[tokio::test]
    async fn test_missing_binary_is_transport_error() {
        let exec = FabricExecutor::with_binary_path("/nonexistent/roundwork-fabric");
        let input = RoundInput {
            run_id: uuid::Uuid::new_v4(),
            round: RoundId::Trends,
            topic: "bikes".into(),
            params: Default::default(),
            upstream: vec![],
        };

        let err = exec.execute(&input).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Transport(_)));
    }
}
