//! Shared pool state.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use agentpool_core::PoolStatus;

use crate::agent::AgentFactory;
use crate::config::PoolConfig;
use crate::event::PoolEvent;
use crate::manager::InstanceManager;
use crate::metrics::MetricsAggregator;
use crate::queue::TaskQueue;

/// State shared by the pool façade, the dispatcher and the sweeper.
pub struct PoolState {
    pub config: PoolConfig,

    /// Pending tasks.
    pub queue: TaskQueue,

    /// Every live instance.
    pub instances: InstanceManager,

    /// Counters and moving averages.
    pub metrics: Mutex<MetricsAggregator>,

    /// Observer channel, if one was attached.
    events: Option<mpsc::UnboundedSender<PoolEvent>>,
}

impl PoolState {
    /// Create a new PoolState wrapped in Arc.
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn AgentFactory>,
        events: Option<mpsc::UnboundedSender<PoolEvent>>,
    ) -> Arc<Self> {
        let instances = InstanceManager::new(factory, &config);
        Arc::new(Self {
            config,
            queue: TaskQueue::new(),
            instances,
            metrics: Mutex::new(MetricsAggregator::new()),
            events,
        })
    }

    /// Send an event to the observer, if any.
    pub fn notify(&self, event: PoolEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                trace!("Event observer dropped");
            }
        }
    }

    /// Build a status snapshot. Reads only; never changes pool state.
    pub async fn status(&self) -> PoolStatus {
        let pools = self.instances.utilization().await;
        let (metrics, active_tasks) = {
            let metrics = self.metrics.lock().await;
            (metrics.snapshot(), metrics.active_tasks())
        };

        PoolStatus {
            total_instances: pools.values().map(|u| u.total).sum(),
            active_tasks,
            queue_depth: self.queue.len(),
            metrics,
            pools,
        }
    }
}
