//! The pool façade: the only entry point callers need.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agentpool_core::{AgentKind, CoreError, InstanceId, PoolStatus, TaskContext, TaskId, TaskRequest};

use crate::agent::AgentFactory;
use crate::config::{ConfigError, PoolConfig};
use crate::dispatcher::Dispatcher;
use crate::event::PoolEvent;
use crate::instance::InstanceInfo;
use crate::queue::QueuedTask;
use crate::selector::{KeywordSelector, TypeSelector};
use crate::state::PoolState;
use crate::sweeper::CleanupSweeper;

/// Errors returned by the pool façade.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Agent pool is shutting down")]
    ShuttingDown,

    #[error("Agent pool did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Invalid pool configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// A task submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub message: String,
    pub context: TaskContext,
    pub priority: u32,

    /// Worker kind; chosen by the selector when absent. An explicit kind
    /// skips the load check.
    pub kind: Option<AgentKind>,

    pub max_retries: Option<u32>,
    pub timeout_secs: Option<u64>,

    /// Cancels the task while it is still queued.
    pub cancel: Option<CancellationToken>,
}

impl SubmitRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: AgentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Builder for [`AgentPool`].
pub struct PoolBuilder {
    config: PoolConfig,
    factory: Arc<dyn AgentFactory>,
    selector: Option<Arc<dyn TypeSelector>>,
    events: Option<mpsc::UnboundedSender<PoolEvent>>,
}

impl PoolBuilder {
    /// Builder method to replace the keyword selector.
    pub fn with_selector(mut self, selector: Arc<dyn TypeSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Builder method to attach an event observer.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PoolEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and spawn the dispatcher and sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<AgentPool, PoolError> {
        self.config.validate()?;

        let selector: Arc<dyn TypeSelector> = match self.selector {
            Some(selector) => selector,
            None => Arc::new(KeywordSelector::new(self.config.load_threshold)),
        };
        let state = PoolState::new(self.config, self.factory, self.events);
        let shutdown = CancellationToken::new();

        let dispatcher = tokio::spawn(Dispatcher::new(state.clone(), shutdown.clone()).run());
        let sweeper = tokio::spawn(CleanupSweeper::new(state.clone(), shutdown.clone()).run());

        info!(
            max_agents_per_type = state.config.max_agents_per_type,
            enforce_task_limits = state.config.enforce_task_limits,
            "Agent pool started"
        );

        Ok(AgentPool {
            state,
            selector,
            shutdown,
            loops: Mutex::new(Some(Loops {
                dispatcher,
                sweeper,
            })),
        })
    }
}

struct Loops {
    dispatcher: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// A bounded, self-maintaining pool of agent instances.
pub struct AgentPool {
    state: Arc<PoolState>,
    selector: Arc<dyn TypeSelector>,
    shutdown: CancellationToken,
    loops: Mutex<Option<Loops>>,
}

impl AgentPool {
    /// Start building a pool that constructs workers through `factory`.
    pub fn builder(config: PoolConfig, factory: Arc<dyn AgentFactory>) -> PoolBuilder {
        PoolBuilder {
            config,
            factory,
            selector: None,
            events: None,
        }
    }

    /// Queue a task and return its id immediately.
    ///
    /// The id identifies the task in events and logs; it cannot be redeemed
    /// for a result.
    pub async fn submit_task(
        &self,
        message: impl Into<String>,
        context: TaskContext,
        priority: u32,
        kind: Option<AgentKind>,
    ) -> Result<TaskId, PoolError> {
        let mut request = SubmitRequest::new(message)
            .with_context(context)
            .with_priority(priority);
        request.kind = kind;
        self.submit(request).await
    }

    /// Queue a task described by `request`.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId, PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }

        let kind = match request.kind {
            Some(kind) => kind,
            None => {
                let loads = self.state.instances.loads().await;
                self.selector
                    .select(&request.message, &request.context, &loads)
            }
        };

        let mut task = TaskRequest::new(request.message, request.context, request.priority)
            .with_preferred_kind(kind);
        if let Some(max_retries) = request.max_retries {
            task = task.with_max_retries(max_retries);
        }
        if let Some(timeout_secs) = request.timeout_secs {
            task = task.with_timeout_secs(timeout_secs);
        }
        let task_id = task.id.clone();
        let priority = task.priority;
        let queued = match request.cancel {
            Some(cancel) => QueuedTask::with_cancel(task, cancel),
            None => QueuedTask::new(task),
        };

        {
            // Count before the dispatcher can record an outcome.
            let mut metrics = self.state.metrics.lock().await;
            self.state
                .queue
                .push(queued)
                .map_err(|_| PoolError::ShuttingDown)?;
            metrics.record_submitted();
        }

        self.state.notify(PoolEvent::TaskSubmitted {
            task_id: task_id.clone(),
            kind,
            priority,
        });
        Ok(task_id)
    }

    /// Current utilization and metrics. Reads only.
    pub async fn status(&self) -> PoolStatus {
        self.state.status().await
    }

    /// Per-instance view of one kind.
    pub async fn instances(&self, kind: AgentKind) -> Vec<InstanceInfo> {
        self.state.instances.instances(kind).await
    }

    /// Move an idle instance into or out of maintenance.
    pub async fn set_maintenance(&self, id: &InstanceId, on: bool) -> Result<(), PoolError> {
        Ok(self.state.instances.set_maintenance(id, on).await?)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.state.config
    }

    /// Stop both loops, waiting at most `shutdown_timeout_secs`.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        self.shutdown_within(self.state.config.shutdown_timeout())
            .await
    }

    /// Stop both loops, waiting at most `limit` for them to finish.
    ///
    /// Queued tasks are abandoned and every remaining instance is shut down.
    /// Calling this again after the pool stopped is a no-op.
    ///
    /// On timeout the loops are aborted. Executions still running are
    /// dropped with them and count as failed; their agents are dropped
    /// without [`Agent::shutdown`](crate::Agent::shutdown).
    pub async fn shutdown_within(&self, limit: Duration) -> Result<(), PoolError> {
        let Some(mut loops) = self.loops.lock().await.take() else {
            return Ok(());
        };

        info!("Shutting down agent pool");
        self.shutdown.cancel();
        self.state.queue.close();

        let joined = tokio::time::timeout(limit, async {
            if let Err(e) = (&mut loops.dispatcher).await {
                warn!(error = %e, "Dispatcher exited abnormally");
            }
            if let Err(e) = (&mut loops.sweeper).await {
                warn!(error = %e, "Sweeper exited abnormally");
            }
        })
        .await;
        if joined.is_err() {
            warn!(timeout = ?limit, "Background loops did not stop in time, aborting");
            for handle in [&mut loops.dispatcher, &mut loops.sweeper] {
                handle.abort();
                if !handle.is_finished() {
                    let _ = handle.await;
                }
            }

            let interrupted = self.state.metrics.lock().await.abandon_active();
            if interrupted > 0 {
                warn!(interrupted, "Dropped executions still running at shutdown");
            }
        }

        let abandoned = self.state.queue.drain();
        for task in &abandoned {
            warn!(
                task_id = %task.request.id,
                priority = task.request.priority,
                "Abandoning queued task"
            );
        }
        let torn_down = self.state.instances.drain().await;

        info!(
            abandoned = abandoned.len(),
            instances = torn_down,
            "Agent pool stopped"
        );
        joined.map_err(|_| PoolError::ShutdownTimeout(limit))
    }
}

impl Drop for AgentPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
