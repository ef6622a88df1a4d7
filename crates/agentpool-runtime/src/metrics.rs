//! Execution metrics and Prometheus text rendering.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use agentpool_core::{AgentKind, KindMetrics, MetricsSnapshot, PoolStatus};

/// Weight kept from the previous latency average.
const LATENCY_DECAY: f64 = 0.9;

/// Weight kept from the previous success-rate average.
const SUCCESS_DECAY: f64 = 0.95;

/// Running counters and per-kind moving averages.
///
/// Each kind's averages are seeded by its first observation.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    total_tasks: u64,
    completed_tasks: u64,
    failed_tasks: u64,
    cancelled_tasks: u64,
    retried_tasks: u64,
    active_tasks: usize,
    per_kind: BTreeMap<AgentKind, KindMetrics>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&mut self) {
        self.total_tasks += 1;
    }

    pub fn begin_task(&mut self) {
        self.active_tasks += 1;
    }

    pub fn end_task(&mut self) {
        self.active_tasks = self.active_tasks.saturating_sub(1);
    }

    /// Close out executions that will never report back. They count as
    /// failed. Returns how many there were.
    pub fn abandon_active(&mut self) -> usize {
        let abandoned = std::mem::take(&mut self.active_tasks);
        self.failed_tasks += abandoned as u64;
        abandoned
    }

    pub fn active_tasks(&self) -> usize {
        self.active_tasks
    }

    /// Record a finished execution that will not be retried.
    pub fn record(&mut self, kind: AgentKind, elapsed: Duration, success: bool) {
        if success {
            self.completed_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.observe(kind, elapsed, success);
    }

    /// Record a failed execution whose task goes back into the queue.
    pub fn record_retry(&mut self, kind: AgentKind, elapsed: Duration) {
        self.retried_tasks += 1;
        self.observe(kind, elapsed, false);
    }

    /// Record a task that failed without ever reaching a worker.
    pub fn record_unserviceable(&mut self) {
        self.failed_tasks += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.cancelled_tasks += 1;
    }

    fn observe(&mut self, kind: AgentKind, elapsed: Duration, success: bool) {
        let latency = elapsed.as_secs_f64();
        let signal = if success { 1.0 } else { 0.0 };

        self.per_kind
            .entry(kind)
            .and_modify(|m| {
                m.total_tasks += 1;
                m.avg_latency_secs =
                    LATENCY_DECAY * m.avg_latency_secs + (1.0 - LATENCY_DECAY) * latency;
                m.success_rate = SUCCESS_DECAY * m.success_rate + (1.0 - SUCCESS_DECAY) * signal;
            })
            .or_insert(KindMetrics {
                total_tasks: 1,
                avg_latency_secs: latency,
                success_rate: signal,
            });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_tasks: self.total_tasks,
            completed_tasks: self.completed_tasks,
            failed_tasks: self.failed_tasks,
            cancelled_tasks: self.cancelled_tasks,
            retried_tasks: self.retried_tasks,
            per_kind: self.per_kind.clone(),
        }
    }
}

/// Format a status snapshot as Prometheus text.
pub fn render_prometheus(status: &PoolStatus) -> String {
    let mut output = String::new();

    render_instance_metrics(status, &mut output);
    render_task_metrics(status, &mut output);
    render_kind_metrics(&status.metrics, &mut output);

    output
}

fn render_instance_metrics(status: &PoolStatus, output: &mut String) {
    writeln!(
        output,
        "# HELP agentpool_instances Number of agent instances by kind and status"
    )
    .ok();
    writeln!(output, "# TYPE agentpool_instances gauge").ok();
    for (kind, util) in &status.pools {
        for (label, count) in [
            ("idle", util.idle),
            ("busy", util.busy),
            ("error", util.error),
            ("maintenance", util.maintenance),
        ] {
            writeln!(
                output,
                "agentpool_instances{{kind=\"{kind}\",status=\"{label}\"}} {count}"
            )
            .ok();
        }
    }

    writeln!(output, "# HELP agentpool_load Fraction of busy instances by kind").ok();
    writeln!(output, "# TYPE agentpool_load gauge").ok();
    for (kind, util) in &status.pools {
        writeln!(output, "agentpool_load{{kind=\"{kind}\"}} {}", util.load).ok();
    }
}

fn render_task_metrics(status: &PoolStatus, output: &mut String) {
    let metrics = &status.metrics;

    writeln!(output, "# HELP agentpool_queue_depth Tasks waiting in the queue").ok();
    writeln!(output, "# TYPE agentpool_queue_depth gauge").ok();
    writeln!(output, "agentpool_queue_depth {}", status.queue_depth).ok();

    writeln!(output, "# HELP agentpool_active_tasks Tasks currently executing").ok();
    writeln!(output, "# TYPE agentpool_active_tasks gauge").ok();
    writeln!(output, "agentpool_active_tasks {}", status.active_tasks).ok();

    writeln!(output, "# HELP agentpool_tasks_total Tasks by outcome").ok();
    writeln!(output, "# TYPE agentpool_tasks_total counter").ok();
    writeln!(
        output,
        "agentpool_tasks_total{{outcome=\"submitted\"}} {}",
        metrics.total_tasks
    )
    .ok();
    writeln!(
        output,
        "agentpool_tasks_total{{outcome=\"completed\"}} {}",
        metrics.completed_tasks
    )
    .ok();
    writeln!(
        output,
        "agentpool_tasks_total{{outcome=\"failed\"}} {}",
        metrics.failed_tasks
    )
    .ok();
    writeln!(
        output,
        "agentpool_tasks_total{{outcome=\"cancelled\"}} {}",
        metrics.cancelled_tasks
    )
    .ok();
    writeln!(
        output,
        "agentpool_tasks_total{{outcome=\"retried\"}} {}",
        metrics.retried_tasks
    )
    .ok();
}

fn render_kind_metrics(metrics: &MetricsSnapshot, output: &mut String) {
    if metrics.per_kind.is_empty() {
        return;
    }

    writeln!(
        output,
        "# HELP agentpool_kind_latency_seconds Moving average execution latency by kind"
    )
    .ok();
    writeln!(output, "# TYPE agentpool_kind_latency_seconds gauge").ok();
    for (kind, m) in &metrics.per_kind {
        writeln!(
            output,
            "agentpool_kind_latency_seconds{{kind=\"{kind}\"}} {:.6}",
            m.avg_latency_secs
        )
        .ok();
    }

    writeln!(
        output,
        "# HELP agentpool_kind_success_rate Moving average success rate by kind"
    )
    .ok();
    writeln!(output, "# TYPE agentpool_kind_success_rate gauge").ok();
    for (kind, m) in &metrics.per_kind {
        writeln!(
            output,
            "agentpool_kind_success_rate{{kind=\"{kind}\"}} {:.4}",
            m.success_rate
        )
        .ok();
    }
}
