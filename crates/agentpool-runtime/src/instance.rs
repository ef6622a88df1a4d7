//! One live worker and the lease handed out while it is busy.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use agentpool_core::{AgentKind, CoreError, InstanceId, InstanceStatus};

use crate::agent::Agent;

/// A registered worker plus its lifecycle state and usage counters.
///
/// The record owns the worker handle. While the instance is busy the handle
/// lives in the [`InstanceLease`] instead, so no other component can reach
/// the worker.
pub struct AgentInstance {
    id: InstanceId,
    kind: AgentKind,
    handle: Option<Box<dyn Agent>>,
    status: InstanceStatus,
    last_used: Instant,
    task_count: u64,
    error_count: u64,
    created_at: DateTime<Utc>,
}

impl AgentInstance {
    /// Wrap a freshly constructed worker as an idle instance.
    #[cfg(test)]
    pub(crate) fn new(id: InstanceId, kind: AgentKind, handle: Box<dyn Agent>) -> Self {
        Self {
            id,
            kind,
            handle: Some(handle),
            status: InstanceStatus::Idle,
            last_used: Instant::now(),
            task_count: 0,
            error_count: 0,
            created_at: Utc::now(),
        }
    }

    /// An instance constructed straight into a lease: Busy, handle held by
    /// the lease.
    pub(crate) fn leased(id: InstanceId, kind: AgentKind) -> Self {
        Self {
            id,
            kind,
            handle: None,
            status: InstanceStatus::Busy,
            last_used: Instant::now(),
            task_count: 0,
            error_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn task_count(&self) -> u64 {
        self.task_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since the last state change, as seen at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Move to `next`, stamping `last_used` on entry to Idle, Busy or Error.
    pub fn transition(&mut self, next: InstanceStatus, at: Instant) -> Result<(), CoreError> {
        self.status = self.status.transition(next)?;
        if next != InstanceStatus::Maintenance {
            self.last_used = at;
        }
        Ok(())
    }

    pub(crate) fn record_success(&mut self) {
        self.task_count += 1;
    }

    pub(crate) fn record_failure(&mut self) {
        self.error_count += 1;
    }

    pub(crate) fn reset_errors(&mut self) {
        self.error_count = 0;
    }

    pub(crate) fn take_handle(&mut self) -> Option<Box<dyn Agent>> {
        self.handle.take()
    }

    pub(crate) fn restore_handle(&mut self, handle: Box<dyn Agent>) {
        self.handle = Some(handle);
    }

    /// Serializable view of this instance.
    pub fn info(&self, now: Instant) -> InstanceInfo {
        InstanceInfo {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            task_count: self.task_count,
            error_count: self.error_count,
            idle_secs: self.idle_for(now).as_secs_f64(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for AgentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentInstance")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("task_count", &self.task_count)
            .field("error_count", &self.error_count)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// Read-only view of an instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub kind: AgentKind,
    pub status: InstanceStatus,
    pub task_count: u64,
    pub error_count: u64,
    pub idle_secs: f64,
    pub created_at: DateTime<Utc>,
}

/// Exclusive use of a busy instance's worker.
pub struct InstanceLease {
    pub instance_id: InstanceId,
    pub kind: AgentKind,
    /// True when the instance was constructed for this lease.
    pub fresh: bool,
    agent: Box<dyn Agent>,
}

impl InstanceLease {
    pub(crate) fn new(
        instance_id: InstanceId,
        kind: AgentKind,
        fresh: bool,
        agent: Box<dyn Agent>,
    ) -> Self {
        Self {
            instance_id,
            kind,
            fresh,
            agent,
        }
    }

    pub fn agent_mut(&mut self) -> &mut dyn Agent {
        self.agent.as_mut()
    }

    pub(crate) fn into_agent(self) -> Box<dyn Agent> {
        self.agent
    }
}

impl fmt::Debug for InstanceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLease")
            .field("instance_id", &self.instance_id)
            .field("kind", &self.kind)
            .field("fresh", &self.fresh)
            .finish()
    }
}

/// How a lease ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The task completed; the instance returns to Idle.
    Completed,
    /// The task failed; the instance moves to Error.
    Failed,
    /// The lease was never used (task cancelled); back to Idle, uncounted.
    Unused,
}
