//! Collaborator contracts: the workers the pool hosts and the factory that
//! builds them.
//!
//! The pool never inspects a worker beyond these traits. Any `Err` returned
//! from [`Agent::respond`] moves the instance into the `Error` state.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use agentpool_core::{AgentKind, InstanceId, TaskContext};

/// Errors raised by a worker while responding.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The worker reported a failure.
    #[error("Agent failed: {0}")]
    Failed(String),

    /// The worker did not answer before the task deadline.
    #[error("Agent timed out after {0:?}")]
    TimedOut(Duration),

    /// The worker panicked mid-execution.
    #[error("Agent panicked: {0}")]
    Panicked(String),
}

/// Errors raised while constructing a worker.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// No constructor is registered for this kind.
    #[error("No agent registered for kind '{0}'")]
    Unsupported(AgentKind),

    /// The constructor ran and failed.
    #[error("Failed to construct {kind}: {reason}")]
    Construction { kind: AgentKind, reason: String },
}

/// Output of a successful `respond` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    pub content: String,
    pub metadata: HashMap<String, Value>,
}

impl AgentResponse {
    /// Create a response with text content only.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Construction parameters handed to the factory.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Id the new instance will be registered under.
    pub instance_id: InstanceId,

    /// Kind being constructed.
    pub kind: AgentKind,

    /// Pool-wide settings from `PoolConfig::agent_settings`.
    pub settings: HashMap<String, String>,
}

/// A stateful worker hosted by the pool.
///
/// `respond` takes `&mut self`: an instance is owned by exactly one
/// execution while it is busy.
#[async_trait]
pub trait Agent: Send {
    /// Handle one task.
    async fn respond(
        &mut self,
        message: &str,
        context: &TaskContext,
    ) -> Result<AgentResponse, AgentError>;

    /// Release resources before the instance is dropped.
    async fn shutdown(&mut self) {}
}

/// Builds workers for the pool on demand.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    /// Construct a worker of `kind`.
    async fn create(
        &self,
        kind: AgentKind,
        config: &AgentConfig,
    ) -> Result<Box<dyn Agent>, FactoryError>;
}
