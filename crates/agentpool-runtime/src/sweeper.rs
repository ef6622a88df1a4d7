//! Periodic instance maintenance.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::event::PoolEvent;
use crate::manager::SweepReport;
use crate::state::PoolState;

/// Evicts long-idle instances and rehabilitates long-erroring ones on a
/// fixed interval.
pub struct CleanupSweeper {
    state: Arc<PoolState>,
    shutdown: CancellationToken,
}

impl CleanupSweeper {
    pub fn new(state: Arc<PoolState>, shutdown: CancellationToken) -> Self {
        Self { state, shutdown }
    }

    /// Run the sweep loop until shutdown. A pass that panics is logged and
    /// the loop carries on.
    pub async fn run(self) {
        let period = self.state.config.sweep_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "Cleanup sweeper started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let state = self.state.clone();
            let pass = tokio::spawn(async move { sweep_once(&state, Instant::now()).await });
            if let Err(e) = pass.await {
                error!(error = %e, "Sweep pass failed");
            }
        }

        info!("Cleanup sweeper stopped");
    }
}

/// Run one sweep pass at `now` and publish its results.
pub async fn sweep_once(state: &PoolState, now: Instant) -> SweepReport {
    let config = &state.config;
    let report = state
        .instances
        .sweep(now, config.idle_timeout(), config.error_cooldown())
        .await;

    for (instance_id, kind) in &report.evicted {
        info!(instance_id = %instance_id, kind = %kind, "Evicted idle agent instance");
        state.notify(PoolEvent::InstanceEvicted {
            instance_id: instance_id.clone(),
            kind: *kind,
        });
    }
    for (instance_id, kind) in &report.recovered {
        info!(instance_id = %instance_id, kind = %kind, "Recovered agent instance from error");
        state.notify(PoolEvent::InstanceRecovered {
            instance_id: instance_id.clone(),
            kind: *kind,
        });
    }
    if report.is_empty() {
        debug!("Sweep found nothing to do");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentConfig, AgentError, AgentFactory, AgentResponse, FactoryError};
    use crate::config::PoolConfig;
    use crate::instance::Release;
    use agentpool_core::{AgentKind, InstanceStatus, TaskContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Tracked(Arc<AtomicUsize>);

    #[async_trait]
    impl Agent for Tracked {
        async fn respond(
            &mut self,
            _message: &str,
            _context: &TaskContext,
        ) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse::default())
        }

        async fn shutdown(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TrackedFactory(Arc<AtomicUsize>);

    #[async_trait]
    impl AgentFactory for TrackedFactory {
        async fn create(
            &self,
            _kind: AgentKind,
            _config: &AgentConfig,
        ) -> Result<Box<dyn Agent>, FactoryError> {
            Ok(Box::new(Tracked(self.0.clone())))
        }
    }

    /// Counts teardowns, then panics in them.
    struct Brittle(Arc<AtomicUsize>);

    #[async_trait]
    impl Agent for Brittle {
        async fn respond(
            &mut self,
            _message: &str,
            _context: &TaskContext,
        ) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse::default())
        }

        async fn shutdown(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("teardown blew up");
        }
    }

    struct BrittleFactory(Arc<AtomicUsize>);

    #[async_trait]
    impl AgentFactory for BrittleFactory {
        async fn create(
            &self,
            _kind: AgentKind,
            _config: &AgentConfig,
        ) -> Result<Box<dyn Agent>, FactoryError> {
            Ok(Box::new(Brittle(self.0.clone())))
        }
    }

    #[tokio::test]
    async fn test_sweep_once_shuts_down_evicted_and_reports() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = PoolState::new(
            PoolConfig::default(),
            Arc::new(TrackedFactory(shutdowns.clone())),
            Some(tx),
        );

        let a = state.instances.acquire(AgentKind::Tool).await.unwrap().unwrap();
        let b = state.instances.acquire(AgentKind::Tool).await.unwrap().unwrap();
        let c = state.instances.acquire(AgentKind::Goal).await.unwrap().unwrap();
        state.instances.release(a, Release::Completed).await;
        state.instances.release(b, Release::Completed).await;
        state.instances.release(c, Release::Failed).await;

        let later = Instant::now() + Duration::from_secs(601);
        let report = sweep_once(&state, later).await;

        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.recovered.len(), 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        let goal = state.instances.instances(AgentKind::Goal).await;
        assert_eq!(goal[0].status, InstanceStatus::Idle);

        let mut evicted = 0;
        let mut recovered = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                PoolEvent::InstanceEvicted { .. } => evicted += 1,
                PoolEvent::InstanceRecovered { .. } => recovered += 1,
                _ => {}
            }
        }
        assert_eq!((evicted, recovered), (1, 1));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let state = PoolState::new(
            PoolConfig::default(),
            Arc::new(TrackedFactory(Arc::new(AtomicUsize::new(0)))),
            None,
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(CleanupSweeper::new(state, shutdown.clone()).run());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_survives_panicking_teardown() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let config = PoolConfig {
            sweep_interval_secs: 1,
            idle_timeout_secs: 0,
            ..Default::default()
        };
        let state = PoolState::new(config, Arc::new(BrittleFactory(shutdowns.clone())), None);

        let a = state.instances.acquire(AgentKind::Tool).await.unwrap().unwrap();
        let b = state.instances.acquire(AgentKind::Tool).await.unwrap().unwrap();
        state.instances.release(a, Release::Completed).await;
        state.instances.release(b, Release::Completed).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(CleanupSweeper::new(state.clone(), shutdown.clone()).run());

        // First pass evicts one instance and panics in its teardown.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(state.instances.instances(AgentKind::Tool).await.len(), 1);
        assert!(!handle.is_finished());

        // Refill the pool; the next pass still runs.
        let a = state.instances.acquire(AgentKind::Tool).await.unwrap().unwrap();
        let b = state.instances.acquire(AgentKind::Tool).await.unwrap().unwrap();
        state.instances.release(a, Release::Completed).await;
        state.instances.release(b, Release::Completed).await;
        assert_eq!(state.instances.instances(AgentKind::Tool).await.len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(state.instances.instances(AgentKind::Tool).await.len(), 1);
        assert!(!handle.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
