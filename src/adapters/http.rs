//! HTTP executor.
//!
//! POSTs the round input as JSON to `<base_url>/<round-name>` and reads a
//! JSON body back. Lets round generation live in a separate service that
//! implements the published round contracts.

use async_trait::async_trait;
use tracing::debug;

use super::{parse_json_output, ExecutionError, RoundExecutor, RoundInput};

/// Executor backed by a remote round service
pub struct HttpExecutor {
    base_url: String,
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Endpoint for a round
    pub fn endpoint(&self, input: &RoundInput) -> String {
        format!("{}/{}", self.base_url, input.round.name())
    }
}

#[async_trait]
impl RoundExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, input: &RoundInput) -> Result<serde_json::Value, ExecutionError> {
        let url = self.endpoint(input);
        debug!(round = %input.round, %url, "Posting round input");

        let response = self
            .client
            .post(&url)
            .json(input)
            .send()
            .await
            .map_err(|e| ExecutionError::Transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::Transport(format!("failed to read response from {}: {}", url, e)))?;

        if !status.is_success() {
            return Err(ExecutionError::Failed(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        parse_json_output(&body)
    }
}
