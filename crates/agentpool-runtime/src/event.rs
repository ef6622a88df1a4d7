//! Pool lifecycle events for observers.

use std::time::Duration;

use agentpool_core::{AgentKind, InstanceId, TaskId};

/// Events sent from the pool to an optional observer channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// Task accepted into the queue.
    TaskSubmitted {
        task_id: TaskId,
        kind: AgentKind,
        priority: u32,
    },

    /// Task handed to an instance.
    TaskStarted {
        task_id: TaskId,
        instance_id: InstanceId,
        kind: AgentKind,
    },

    /// Task completed successfully.
    TaskCompleted {
        task_id: TaskId,
        instance_id: InstanceId,
        kind: AgentKind,
        elapsed: Duration,
    },

    /// Task failed for good.
    TaskFailed {
        task_id: TaskId,
        kind: AgentKind,
        error: String,
    },

    /// Task put back into the queue.
    TaskRequeued {
        task_id: TaskId,
        kind: AgentKind,
        priority: u32,
    },

    /// Task cancelled before execution.
    TaskCancelled {
        task_id: TaskId,
    },

    /// New instance constructed.
    InstanceCreated {
        instance_id: InstanceId,
        kind: AgentKind,
    },

    /// Idle instance removed by the sweeper.
    InstanceEvicted {
        instance_id: InstanceId,
        kind: AgentKind,
    },

    /// Errored instance returned to service by the sweeper.
    InstanceRecovered {
        instance_id: InstanceId,
        kind: AgentKind,
    },
}

impl PoolEvent {
    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::TaskSubmitted { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskRequeued { task_id, .. }
            | Self::TaskCancelled { task_id } => Some(task_id),
            Self::InstanceCreated { .. }
            | Self::InstanceEvicted { .. }
            | Self::InstanceRecovered { .. } => None,
        }
    }
}
