//! The single queue consumer.
//!
//! The dispatcher takes tasks in priority order, leases an instance of the
//! task's kind and spawns the execution, so instances of several kinds run
//! side by side. A task that finds no instance loses one priority point, goes
//! back into the queue, and the dispatcher waits for a release (bounded by
//! `requeue_backoff_ms`) before taking again.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agentpool_core::{AgentKind, TaskRequest};

use crate::agent::{AgentError, AgentResponse, FactoryError};
use crate::event::PoolEvent;
use crate::instance::{InstanceLease, Release};
use crate::manager::panic_message;
use crate::queue::{QueueError, QueuedTask};
use crate::state::PoolState;

/// Consumes the task queue until shutdown.
pub struct Dispatcher {
    state: Arc<PoolState>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(state: Arc<PoolState>, shutdown: CancellationToken) -> Self {
        Self { state, shutdown }
    }

    /// Run the dispatch loop. Returns once shutdown is signalled and every
    /// in-flight execution has finished.
    pub async fn run(self) {
        let mut in_flight = JoinSet::new();
        info!("Dispatcher started");

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join(joined);
            }

            let taken = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                taken = self.state.queue.take(self.state.config.take_timeout()) => taken,
            };
            let Some(task) = taken else {
                continue;
            };

            self.dispatch(task, &mut in_flight).await;
        }

        let draining = in_flight.len();
        if draining > 0 {
            info!(in_flight = draining, "Waiting for in-flight tasks");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
        info!("Dispatcher stopped");
    }

    async fn dispatch(&self, task: QueuedTask, in_flight: &mut JoinSet<()>) {
        let kind = task.request.preferred_kind().unwrap_or(AgentKind::Utility);
        let task_id = task.request.id.clone();

        if task.cancel.is_cancelled() {
            cancel_task(&self.state, &task).await;
            return;
        }

        let lease = match self.state.instances.acquire(kind).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(task_id = %task_id, kind = %kind, "No instance available");
                self.requeue_and_wait(task, kind).await;
                return;
            }
            Err(FactoryError::Unsupported(kind)) => {
                warn!(task_id = %task_id, kind = %kind, "No agent registered for kind, dropping task");
                self.state.metrics.lock().await.record_unserviceable();
                self.state.notify(PoolEvent::TaskFailed {
                    task_id,
                    kind,
                    error: FactoryError::Unsupported(kind).to_string(),
                });
                return;
            }
            Err(e) => {
                warn!(task_id = %task_id, kind = %kind, error = %e, "Failed to construct agent");
                self.requeue_and_wait(task, kind).await;
                return;
            }
        };

        if lease.fresh {
            self.state.notify(PoolEvent::InstanceCreated {
                instance_id: lease.instance_id.clone(),
                kind,
            });
        }

        if task.cancel.is_cancelled() {
            self.state.instances.release(lease, Release::Unused).await;
            cancel_task(&self.state, &task).await;
            return;
        }

        debug!(
            task_id = %task_id,
            kind = %kind,
            instance_id = %lease.instance_id,
            priority = task.request.priority,
            "Dispatching task"
        );
        self.state.metrics.lock().await.begin_task();
        self.state.notify(PoolEvent::TaskStarted {
            task_id,
            instance_id: lease.instance_id.clone(),
            kind,
        });

        in_flight.spawn(execute(self.state.clone(), task, lease));
    }

    /// Demote and requeue a task that found no instance, then pause until an
    /// instance is released or the backoff elapses.
    async fn requeue_and_wait(&self, mut task: QueuedTask, kind: AgentKind) {
        task.request.demote();
        let task_id = task.request.id.clone();
        let priority = task.request.priority;

        match self.state.queue.push(task) {
            Ok(()) => {
                warn!(task_id = %task_id, kind = %kind, priority, "Requeued task");
                self.state.notify(PoolEvent::TaskRequeued {
                    task_id,
                    kind,
                    priority,
                });
            }
            Err(QueueError::Closed(task)) => {
                abandon(&task.request);
                return;
            }
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.state.instances.wait_for_release(self.state.config.requeue_backoff()) => {}
        }
    }
}

/// Run one task on its leased instance and record the outcome.
async fn execute(state: Arc<PoolState>, mut task: QueuedTask, mut lease: InstanceLease) {
    let kind = lease.kind;
    let instance_id = lease.instance_id.clone();
    let task_id = task.request.id.clone();
    let deadline = task_deadline(&state, &task.request);

    task.attempts += 1;
    let started = Instant::now();
    let result = invoke(&mut lease, &task.request, deadline).await;
    let elapsed = started.elapsed();

    match result {
        Ok(_) => {
            state.instances.release(lease, Release::Completed).await;
            {
                let mut metrics = state.metrics.lock().await;
                metrics.record(kind, elapsed, true);
                metrics.end_task();
            }
            debug!(
                task_id = %task_id,
                instance_id = %instance_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Task completed"
            );
            state.notify(PoolEvent::TaskCompleted {
                task_id,
                instance_id,
                kind,
                elapsed,
            });
        }
        Err(e) => {
            match &e {
                AgentError::Panicked(_) => {
                    error!(task_id = %task_id, instance_id = %instance_id, error = %e, "Agent panicked")
                }
                _ => warn!(task_id = %task_id, instance_id = %instance_id, error = %e, "Task failed"),
            }
            state.instances.release(lease, Release::Failed).await;

            let retry = state.config.enforce_task_limits
                && task.attempts <= task.request.max_retries
                && !task.cancel.is_cancelled();
            let requeued = if retry {
                let priority = task.request.priority;
                match state.queue.push(task) {
                    Ok(()) => {
                        info!(task_id = %task_id, kind = %kind, "Retrying failed task");
                        state.notify(PoolEvent::TaskRequeued {
                            task_id: task_id.clone(),
                            kind,
                            priority,
                        });
                        true
                    }
                    Err(QueueError::Closed(_)) => false,
                }
            } else {
                false
            };

            {
                let mut metrics = state.metrics.lock().await;
                if requeued {
                    metrics.record_retry(kind, elapsed);
                } else {
                    metrics.record(kind, elapsed, false);
                }
                metrics.end_task();
            }
            if !requeued {
                state.notify(PoolEvent::TaskFailed {
                    task_id,
                    kind,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Call `respond`, mapping panics and an expired deadline to errors.
async fn invoke(
    lease: &mut InstanceLease,
    request: &TaskRequest,
    deadline: Option<Duration>,
) -> Result<AgentResponse, AgentError> {
    let call = AssertUnwindSafe(lease.agent_mut().respond(&request.message, &request.context))
        .catch_unwind();

    let outcome = match deadline {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(AgentError::TimedOut(limit)),
        },
        None => call.await,
    };

    outcome.unwrap_or_else(|panic| Err(AgentError::Panicked(panic_message(&*panic))))
}

fn task_deadline(state: &PoolState, request: &TaskRequest) -> Option<Duration> {
    if state.config.enforce_task_limits && request.timeout_secs > 0 {
        Some(Duration::from_secs(request.timeout_secs))
    } else {
        None
    }
}

async fn cancel_task(state: &PoolState, task: &QueuedTask) {
    debug!(task_id = %task.request.id, "Task cancelled before execution");
    state.metrics.lock().await.record_cancelled();
    state.notify(PoolEvent::TaskCancelled {
        task_id: task.request.id.clone(),
    });
}

fn abandon(request: &TaskRequest) {
    warn!(
        task_id = %request.id,
        priority = request.priority,
        "Queue closed, abandoning task"
    );
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Task execution aborted");
    }
}
