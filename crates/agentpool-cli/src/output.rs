//! Status report rendering.

use clap::ValueEnum;

use agentpool_core::PoolStatus;
use agentpool_runtime::metrics::render_prometheus;

/// Report format for the final pool status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Prometheus,
}

/// Render `status` in the requested format.
pub fn render(status: &PoolStatus, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Table => Ok(render_table(status)),
        OutputFormat::Json => serde_json::to_string_pretty(status),
        OutputFormat::Prometheus => Ok(render_prometheus(status)),
    }
}

fn render_table(status: &PoolStatus) -> String {
    let metrics = &status.metrics;
    let mut lines = vec![
        format!(
            "Tasks: {} submitted, {} completed, {} failed, {} cancelled, {} retried",
            metrics.total_tasks,
            metrics.completed_tasks,
            metrics.failed_tasks,
            metrics.cancelled_tasks,
            metrics.retried_tasks
        ),
        format!(
            "Instances: {}  Active: {}  Queued: {}",
            status.total_instances, status.active_tasks, status.queue_depth
        ),
        String::new(),
        format!(
            "{:<14}  {:>5}  {:>4}  {:>4}  {:>5}  {:>5}  {:>5}  {:>11}  {:>7}",
            "KIND", "TOTAL", "IDLE", "BUSY", "ERROR", "MAINT", "LOAD", "AVG_LATENCY", "SUCCESS"
        ),
        "-".repeat(82),
    ];

    for (kind, util) in &status.pools {
        let (latency, success) = match metrics.per_kind.get(kind) {
            Some(m) => (
                format!("{:.3}s", m.avg_latency_secs),
                format!("{:.1}%", m.success_rate * 100.0),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        lines.push(format!(
            "{:<14}  {:>5}  {:>4}  {:>4}  {:>5}  {:>5}  {:>5.2}  {:>11}  {:>7}",
            kind.as_str(),
            util.total,
            util.idle,
            util.busy,
            util.error,
            util.maintenance,
            util.load,
            latency,
            success
        ));
    }

    lines.join("\n")
}
