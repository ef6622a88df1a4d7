//! Demonstration workers for the CLI.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use agentpool_core::{AgentKind, TaskContext};
use agentpool_runtime::{
    Agent, AgentConfig, AgentError, AgentRegistry, AgentResponse, FactoryError,
};

/// `agent_settings` key for the simulated latency in milliseconds.
pub const LATENCY_MS_SETTING: &str = "latency_ms";

/// `agent_settings` key for the substring that makes a task fail.
pub const FAIL_MARKER_SETTING: &str = "fail_marker";

/// Echoes the message back, tagged with its kind, after a fixed delay.
#[derive(Debug)]
pub struct EchoAgent {
    kind: AgentKind,
    latency: Duration,
    fail_marker: Option<String>,
}

impl EchoAgent {
    /// Build an echo agent from factory settings.
    pub fn from_config(config: &AgentConfig) -> Result<Self, FactoryError> {
        let latency_ms = match config.settings.get(LATENCY_MS_SETTING) {
            Some(raw) => raw.parse::<u64>().map_err(|e| FactoryError::Construction {
                kind: config.kind,
                reason: format!("invalid {LATENCY_MS_SETTING} '{raw}': {e}"),
            })?,
            None => 0,
        };
        let fail_marker = config
            .settings
            .get(FAIL_MARKER_SETTING)
            .filter(|marker| !marker.is_empty())
            .cloned();

        Ok(Self {
            kind: config.kind,
            latency: Duration::from_millis(latency_ms),
            fail_marker,
        })
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn respond(
        &mut self,
        message: &str,
        _context: &TaskContext,
    ) -> Result<AgentResponse, AgentError> {
        tokio::time::sleep(self.latency).await;

        if let Some(marker) = &self.fail_marker {
            if message.contains(marker.as_str()) {
                return Err(AgentError::Failed(format!(
                    "message contains fail marker '{marker}'"
                )));
            }
        }
        Ok(AgentResponse::text(format!("[{}] {message}", self.kind)))
    }

    async fn shutdown(&mut self) {
        debug!(kind = %self.kind, "Echo agent shut down");
    }
}

/// Registry with an echo agent behind every kind.
pub fn echo_registry() -> AgentRegistry {
    AgentRegistry::new().register_all(|config: &AgentConfig| {
        EchoAgent::from_config(config).map(|agent| Box::new(agent) as Box<dyn Agent>)
    })
}
