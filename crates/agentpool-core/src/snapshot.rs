//! Point-in-time pool status reported to callers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::AgentKind;

/// Per-kind instance utilization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindUtilization {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub error: usize,
    pub maintenance: usize,
    /// Fraction of instances currently busy.
    pub load: f64,
}

impl KindUtilization {
    /// `busy / max(total, 1)`.
    pub fn compute_load(busy: usize, total: usize) -> f64 {
        busy as f64 / total.max(1) as f64
    }
}

/// Rolling per-kind execution statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindMetrics {
    /// Executions observed for this kind, including retried attempts.
    pub total_tasks: u64,
    /// Exponentially weighted moving average of execution latency.
    pub avg_latency_secs: f64,
    /// Exponentially weighted moving average of the success signal.
    pub success_rate: f64,
}

/// Process-wide task counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub retried_tasks: u64,
    pub per_kind: BTreeMap<AgentKind, KindMetrics>,
}

impl MetricsSnapshot {
    /// Tasks that reached an outcome.
    pub fn finished_tasks(&self) -> u64 {
        self.completed_tasks + self.failed_tasks + self.cancelled_tasks
    }
}

/// Snapshot returned by the pool status query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub total_instances: usize,
    pub active_tasks: usize,
    pub queue_depth: usize,
    pub metrics: MetricsSnapshot,
    pub pools: BTreeMap<AgentKind, KindUtilization>,
}

impl PoolStatus {
    /// Utilization for one kind; all zeros when the kind has no instances.
    pub fn kind(&self, kind: AgentKind) -> KindUtilization {
        self.pools.get(&kind).cloned().unwrap_or_default()
    }
}
