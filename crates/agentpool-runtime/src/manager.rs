//! Instance table: bounded creation, reuse, release and sweeping of agent
//! instances.
//!
//! All mutation goes through one mutex. The lock is never held across a
//! worker's `respond`, and factory construction runs outside it against a
//! reserved slot, so `instances + reservations <= max_agents_per_type`
//! holds for every kind at every point.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{error, info, warn};

use agentpool_core::{AgentKind, CoreError, InstanceId, InstanceStatus, KindUtilization};

use crate::agent::{Agent, AgentConfig, AgentFactory, FactoryError};
use crate::config::PoolConfig;
use crate::instance::{AgentInstance, InstanceInfo, InstanceLease, Release};
use crate::selector::LoadView;

#[derive(Default)]
struct InstanceTable {
    pools: HashMap<AgentKind, Vec<AgentInstance>>,
    /// Slots held by constructions in flight.
    reserved: HashMap<AgentKind, usize>,
}

impl InstanceTable {
    fn occupied(&self, kind: AgentKind) -> usize {
        let live = self.pools.get(&kind).map_or(0, Vec::len);
        live + self.reserved.get(&kind).copied().unwrap_or(0)
    }

    fn unreserve(&mut self, kind: AgentKind) {
        if let Some(count) = self.reserved.get_mut(&kind) {
            *count = count.saturating_sub(1);
        }
    }

    fn find_mut(&mut self, id: &InstanceId) -> Option<&mut AgentInstance> {
        self.pools
            .values_mut()
            .flat_map(|pool| pool.iter_mut())
            .find(|instance| instance.id() == id)
    }

    /// Mark the first idle instance of `kind` busy and lease its worker.
    fn lease_idle(&mut self, kind: AgentKind, now: Instant) -> Option<InstanceLease> {
        let pool = self.pools.get_mut(&kind)?;
        for instance in pool.iter_mut() {
            if !instance.status().is_available() {
                continue;
            }
            let Some(agent) = instance.take_handle() else {
                error!(instance_id = %instance.id(), "Idle instance has no worker handle");
                continue;
            };
            if let Err(e) = instance.transition(InstanceStatus::Busy, now) {
                error!(instance_id = %instance.id(), error = %e, "Failed to mark instance busy");
                instance.restore_handle(agent);
                continue;
            }
            return Some(InstanceLease::new(
                instance.id().clone(),
                kind,
                false,
                agent,
            ));
        }
        None
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub evicted: Vec<(InstanceId, AgentKind)>,
    pub recovered: Vec<(InstanceId, AgentKind)>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.recovered.is_empty()
    }
}

/// Owns every agent instance in the pool.
pub struct InstanceManager {
    table: Mutex<InstanceTable>,
    factory: Arc<dyn AgentFactory>,
    max_per_kind: usize,
    agent_settings: HashMap<String, String>,
    /// Signalled whenever an instance becomes Idle.
    released: Notify,
}

impl InstanceManager {
    /// Create a manager that builds workers through `factory`.
    pub fn new(factory: Arc<dyn AgentFactory>, config: &PoolConfig) -> Self {
        Self {
            table: Mutex::new(InstanceTable::default()),
            factory,
            max_per_kind: config.max_agents_per_type,
            agent_settings: config.agent_settings.clone(),
            released: Notify::new(),
        }
    }

    pub fn max_per_kind(&self) -> usize {
        self.max_per_kind
    }

    /// Lease an instance of `kind`, reusing an idle one or constructing a
    /// new one below capacity.
    ///
    /// Returns `Ok(None)` when the kind is at capacity with nothing idle.
    /// The leased instance is already `Busy` when this returns.
    pub async fn acquire(&self, kind: AgentKind) -> Result<Option<InstanceLease>, FactoryError> {
        {
            let mut table = self.table.lock().await;
            table.pools.entry(kind).or_default();

            if let Some(lease) = table.lease_idle(kind, Instant::now()) {
                return Ok(Some(lease));
            }
            if table.occupied(kind) >= self.max_per_kind {
                return Ok(None);
            }
            *table.reserved.entry(kind).or_default() += 1;
        }

        let instance_id = InstanceId::for_kind(kind);
        let config = AgentConfig {
            instance_id: instance_id.clone(),
            kind,
            settings: self.agent_settings.clone(),
        };
        let created = AssertUnwindSafe(self.factory.create(kind, &config))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(FactoryError::Construction {
                    kind,
                    reason: format!("constructor panicked: {}", panic_message(&*panic)),
                })
            });

        let mut table = self.table.lock().await;
        table.unreserve(kind);
        let agent = created?;

        table
            .pools
            .entry(kind)
            .or_default()
            .push(AgentInstance::leased(instance_id.clone(), kind));

        info!(
            kind = %kind,
            instance_id = %instance_id,
            count = table.occupied(kind),
            max = self.max_per_kind,
            "Created agent instance"
        );
        Ok(Some(InstanceLease::new(instance_id, kind, true, agent)))
    }

    /// Return a lease, recording how the execution ended.
    pub async fn release(&self, lease: InstanceLease, outcome: Release) {
        let instance_id = lease.instance_id.clone();
        let released = {
            let mut table = self.table.lock().await;
            let released = match table.find_mut(&instance_id) {
                Some(instance) => {
                    instance.restore_handle(lease.into_agent());
                    let next = match outcome {
                        Release::Completed => {
                            instance.record_success();
                            InstanceStatus::Idle
                        }
                        Release::Failed => {
                            instance.record_failure();
                            InstanceStatus::Error
                        }
                        Release::Unused => InstanceStatus::Idle,
                    };
                    match instance.transition(next, Instant::now()) {
                        Ok(()) => Ok(next == InstanceStatus::Idle),
                        Err(e) => {
                            error!(instance_id = %instance_id, error = %e, "Failed to release instance");
                            Ok(false)
                        }
                    }
                }
                None => Err(lease.into_agent()),
            };
            released
        };

        match released {
            Ok(true) => self.released.notify_one(),
            Ok(false) => {}
            Err(mut orphan) => {
                warn!(instance_id = %instance_id, "Released instance is no longer registered");
                orphan.shutdown().await;
            }
        }
    }

    /// Wait until an instance becomes idle, or `max_wait` elapses.
    pub async fn wait_for_release(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.released.notified()).await;
    }

    /// Move an idle instance out of rotation, or back in.
    pub async fn set_maintenance(&self, id: &InstanceId, on: bool) -> Result<(), CoreError> {
        let mut table = self.table.lock().await;
        let instance = table
            .find_mut(id)
            .ok_or_else(|| CoreError::InstanceNotFound(id.to_string()))?;

        let next = if on {
            InstanceStatus::Maintenance
        } else {
            InstanceStatus::Idle
        };
        instance.transition(next, Instant::now())?;
        drop(table);

        info!(instance_id = %id, maintenance = on, "Instance maintenance toggled");
        if !on {
            self.released.notify_one();
        }
        Ok(())
    }

    /// Evict long-idle instances and rehabilitate long-erroring ones.
    ///
    /// Never evicts the last instance of a kind, and never touches a busy or
    /// maintenance instance. Evicted workers are shut down after the table
    /// lock is released.
    pub async fn sweep(
        &self,
        now: Instant,
        idle_timeout: Duration,
        error_cooldown: Duration,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let mut evicted_agents: Vec<Box<dyn Agent>> = Vec::new();

        {
            let mut table = self.table.lock().await;
            for (kind, pool) in table.pools.iter_mut() {
                while pool.len() > 1 {
                    let stalest = pool
                        .iter()
                        .enumerate()
                        .filter(|(_, i)| i.status() == InstanceStatus::Idle)
                        .filter(|(_, i)| i.idle_for(now) > idle_timeout)
                        .max_by_key(|(_, i)| i.idle_for(now))
                        .map(|(index, _)| index);

                    let Some(index) = stalest else {
                        break;
                    };
                    let mut instance = pool.remove(index);
                    if let Some(agent) = instance.take_handle() {
                        evicted_agents.push(agent);
                    }
                    report.evicted.push((instance.id().clone(), *kind));
                }

                for instance in pool.iter_mut() {
                    if instance.status() != InstanceStatus::Error
                        || instance.idle_for(now) <= error_cooldown
                    {
                        continue;
                    }
                    match instance.transition(InstanceStatus::Idle, now) {
                        Ok(()) => {
                            instance.reset_errors();
                            report.recovered.push((instance.id().clone(), *kind));
                        }
                        Err(e) => {
                            warn!(instance_id = %instance.id(), error = %e, "Skipping recovery");
                        }
                    }
                }
            }
        }

        for mut agent in evicted_agents {
            agent.shutdown().await;
        }
        if !report.recovered.is_empty() {
            self.released.notify_one();
        }
        report
    }

    /// Current load per kind.
    pub async fn loads(&self) -> LoadView {
        let table = self.table.lock().await;
        table
            .pools
            .iter()
            .fold(LoadView::new(), |view, (kind, pool)| {
                let busy = pool
                    .iter()
                    .filter(|i| i.status() == InstanceStatus::Busy)
                    .count();
                view.with_load(*kind, KindUtilization::compute_load(busy, pool.len()))
            })
    }

    /// Per-kind status counts for every kind the pool has touched.
    pub async fn utilization(&self) -> BTreeMap<AgentKind, KindUtilization> {
        let table = self.table.lock().await;
        table
            .pools
            .iter()
            .map(|(kind, pool)| {
                let mut util = KindUtilization {
                    total: pool.len(),
                    ..Default::default()
                };
                for instance in pool {
                    match instance.status() {
                        InstanceStatus::Idle => util.idle += 1,
                        InstanceStatus::Busy => util.busy += 1,
                        InstanceStatus::Error => util.error += 1,
                        InstanceStatus::Maintenance => util.maintenance += 1,
                    }
                }
                util.load = KindUtilization::compute_load(util.busy, util.total);
                (*kind, util)
            })
            .collect()
    }

    /// Number of instances of `kind`.
    pub async fn count(&self, kind: AgentKind) -> usize {
        self.table.lock().await.pools.get(&kind).map_or(0, Vec::len)
    }

    /// Snapshot of every instance of `kind`.
    pub async fn instances(&self, kind: AgentKind) -> Vec<InstanceInfo> {
        let now = Instant::now();
        let table = self.table.lock().await;
        table
            .pools
            .get(&kind)
            .map(|pool| pool.iter().map(|i| i.info(now)).collect())
            .unwrap_or_default()
    }

    /// Remove every instance and shut its worker down. Returns how many
    /// instances were torn down.
    pub async fn drain(&self) -> usize {
        let instances: Vec<AgentInstance> = {
            let mut table = self.table.lock().await;
            table.pools.drain().flat_map(|(_, pool)| pool).collect()
        };

        let count = instances.len();
        for mut instance in instances {
            match instance.take_handle() {
                Some(mut agent) => agent.shutdown().await,
                None => warn!(instance_id = %instance.id(), "Dropping instance still leased"),
            }
        }
        count
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
