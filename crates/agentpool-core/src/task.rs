//! Task requests submitted to the pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::{AgentKind, TaskId};

/// Free-form task context handed to the worker untouched.
pub type TaskContext = HashMap<String, Value>;

/// Context key carrying the resolved worker type for a task.
pub const PREFERRED_AGENT_TYPE_KEY: &str = "preferred_agent_type";

/// Context key carrying a capability keyword to route on.
pub const CAPABILITY_KEY: &str = "capability";

/// Default retry budget when task limits are enforced.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default execution deadline when task limits are enforced.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A unit of work submitted to the pool.
///
/// Higher `priority` is served sooner. Tasks are consumed exactly once by the
/// dispatcher and discarded after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique task identifier, assigned at submission.
    pub id: TaskId,

    /// Input text.
    pub message: String,

    /// Context map, including the resolved preferred type.
    pub context: TaskContext,

    /// Larger is served sooner.
    pub priority: u32,

    /// Retry budget. Only consulted when the pool enforces task limits.
    pub max_retries: u32,

    /// Execution deadline in seconds (0 = none). Only consulted when the pool
    /// enforces task limits.
    pub timeout_secs: u64,

    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl TaskRequest {
    /// Create a new TaskRequest.
    pub fn new(message: impl Into<String>, context: TaskContext, priority: u32) -> Self {
        Self {
            id: TaskId::generate(),
            message: message.into(),
            context,
            priority,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            created_at: Utc::now(),
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Builder method to pin the worker type.
    pub fn with_preferred_kind(mut self, kind: AgentKind) -> Self {
        self.context.insert(
            PREFERRED_AGENT_TYPE_KEY.to_string(),
            Value::String(kind.as_str().to_string()),
        );
        self
    }

    /// Builder method to set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder method to set the execution deadline.
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// The worker type named in the context, if it parses.
    pub fn preferred_kind(&self) -> Option<AgentKind> {
        preferred_kind(&self.context)
    }

    /// Lose one priority point, floored at zero.
    pub fn demote(&mut self) {
        self.priority = self.priority.saturating_sub(1);
    }
}

/// Read the preferred worker type out of a context map.
pub fn preferred_kind(context: &TaskContext) -> Option<AgentKind> {
    context
        .get(PREFERRED_AGENT_TYPE_KEY)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
}

/// Read the requested capability out of a context map.
pub fn requested_capability(context: &TaskContext) -> Option<&str> {
    context.get(CAPABILITY_KEY).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = TaskRequest::new("hello", TaskContext::new(), 2);
        assert_eq!(task.priority, 2);
        assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(task.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(task.preferred_kind().is_none());
    }

    #[test]
    fn test_preferred_kind_from_context() {
        let task = TaskRequest::new("x", TaskContext::new(), 1).with_preferred_kind(AgentKind::Goal);
        assert_eq!(task.preferred_kind(), Some(AgentKind::Goal));
        assert_eq!(
            task.context.get(PREFERRED_AGENT_TYPE_KEY),
            Some(&Value::String("GoalAgent".to_string()))
        );
    }

    #[test]
    fn test_unparseable_preferred_kind_is_ignored() {
        let mut context = TaskContext::new();
        context.insert(PREFERRED_AGENT_TYPE_KEY.to_string(), Value::from(42));
        assert!(preferred_kind(&context).is_none());

        context.insert(PREFERRED_AGENT_TYPE_KEY.to_string(), Value::from("Nobody"));
        assert!(preferred_kind(&context).is_none());
    }

    #[test]
    fn test_demote_floors_at_zero() {
        let mut task = TaskRequest::new("x", TaskContext::new(), 1);
        task.demote();
        assert_eq!(task.priority, 0);
        task.demote();
        assert_eq!(task.priority, 0);
    }

    #[test]
    fn test_requested_capability() {
        let mut context = TaskContext::new();
        assert!(requested_capability(&context).is_none());
        context.insert(CAPABILITY_KEY.to_string(), Value::from("mood_tracking"));
        assert_eq!(requested_capability(&context), Some("mood_tracking"));
    }
}
