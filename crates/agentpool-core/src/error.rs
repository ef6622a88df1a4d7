//! Core domain errors.

use thiserror::Error;

/// Core domain errors for AgentPool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Instance not found.
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Invalid instance state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Agent type tag that does not name a known kind.
    #[error("Unknown agent kind: {0}")]
    UnknownAgentKind(String),
}
