//! End-to-end behaviour of the pool façade with scripted agents.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agentpool_core::{AgentKind, InstanceStatus, PoolStatus, TaskContext};
use agentpool_runtime::{
    Agent, AgentConfig, AgentError, AgentFactory, AgentPool, AgentResponse, FactoryError,
    PoolConfig, PoolError, PoolEvent, SubmitRequest,
};

/// Sleeps for a fixed latency, fails on "fail", panics on "panic".
struct ScriptedAgent {
    latency: Duration,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn respond(
        &mut self,
        message: &str,
        _context: &TaskContext,
    ) -> Result<AgentResponse, AgentError> {
        tokio::time::sleep(self.latency).await;
        if message.contains("panic") {
            panic!("scripted panic");
        }
        if message.contains("fail") {
            return Err(AgentError::Failed(format!("scripted failure: {message}")));
        }
        Ok(AgentResponse::text(message))
    }

    async fn shutdown(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct ScriptedFactory {
    latency: Duration,
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Default::default()
        })
    }
}

#[async_trait]
impl AgentFactory for ScriptedFactory {
    async fn create(
        &self,
        _kind: AgentKind,
        _config: &AgentConfig,
    ) -> Result<Box<dyn Agent>, FactoryError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedAgent {
            latency: self.latency,
            live: self.live.clone(),
        }))
    }
}

fn fast_config() -> PoolConfig {
    PoolConfig {
        take_timeout_ms: 10,
        requeue_backoff_ms: 10,
        ..Default::default()
    }
}

async fn wait_finished(pool: &AgentPool, finished: u64) -> PoolStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = pool.status().await;
        if status.metrics.finished_tasks() >= finished {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {finished} tasks: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_capacity_holds_under_concurrent_submission() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(30));
    let config = PoolConfig {
        max_agents_per_type: 2,
        ..fast_config()
    };
    let pool = Arc::new(AgentPool::builder(config, factory.clone()).start().unwrap());

    let mut submitters = Vec::new();
    for i in 0..4 {
        let pool = pool.clone();
        submitters.push(tokio::spawn(async move {
            pool.submit_task(format!("search item {i}"), TaskContext::new(), 1, None)
                .await
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap().unwrap();
    }

    let status = wait_finished(&pool, 4).await;
    assert_eq!(status.metrics.completed_tasks, 4);
    assert!(status.kind(AgentKind::Tool).total <= 2);
    assert!(factory.created.load(Ordering::SeqCst) <= 2);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_is_idempotent_and_metrics_monotonic() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(1));
    let pool = AgentPool::builder(fast_config(), factory).start().unwrap();

    let mut last_total = 0;
    for i in 0..5 {
        pool.submit_task(format!("remember {i}"), TaskContext::new(), i, None)
            .await
            .unwrap();
        let status = pool.status().await;
        assert!(status.metrics.total_tasks >= last_total);
        assert!(
            status.metrics.completed_tasks + status.metrics.failed_tasks
                <= status.metrics.total_tasks
        );
        last_total = status.metrics.total_tasks;
    }

    wait_finished(&pool, 5).await;
    let first = pool.status().await;
    let second = pool.status().await;
    assert_eq!(first, second);
    assert_eq!(first.metrics.total_tasks, 5);
    assert_eq!(first.active_tasks, 0);
    assert_eq!(first.queue_depth, 0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failures_are_counted_and_park_instances_in_error() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(1));
    let pool = AgentPool::builder(fast_config(), factory).start().unwrap();

    pool.submit(SubmitRequest::new("this will fail").with_kind(AgentKind::Goal))
        .await
        .unwrap();
    pool.submit(SubmitRequest::new("panic now").with_kind(AgentKind::Goal))
        .await
        .unwrap();
    pool.submit(SubmitRequest::new("fine").with_kind(AgentKind::Summary))
        .await
        .unwrap();

    let status = wait_finished(&pool, 3).await;
    assert_eq!(status.metrics.failed_tasks, 2);
    assert_eq!(status.metrics.completed_tasks, 1);
    assert_eq!(status.kind(AgentKind::Goal).error, status.kind(AgentKind::Goal).total);

    let goal = &status.metrics.per_kind[&AgentKind::Goal];
    assert_eq!(goal.success_rate, 0.0);

    let instances = pool.instances(AgentKind::Goal).await;
    assert!(instances.iter().all(|i| i.status == InstanceStatus::Error));

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_selector_routes_by_keyword_and_capability() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(1));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let pool = AgentPool::builder(fast_config(), factory)
        .with_events(tx)
        .start()
        .unwrap();

    let mut context = TaskContext::new();
    context.insert("capability".to_string(), "sentiment_analysis".into());
    pool.submit_task("hello there", context, 1, None).await.unwrap();
    pool.submit_task("summarize this", TaskContext::new(), 1, None)
        .await
        .unwrap();
    pool.submit_task("nothing special", TaskContext::new(), 1, None)
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while kinds.len() < 3 {
        if let Some(PoolEvent::TaskSubmitted { kind, .. }) = rx.recv().await {
            kinds.push(kind);
        }
    }
    assert_eq!(
        kinds,
        vec![AgentKind::Emotion, AgentKind::Summary, AgentKind::Utility]
    );

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_submission_is_not_executed() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(1));
    let pool = AgentPool::builder(fast_config(), factory.clone())
        .start()
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    pool.submit(SubmitRequest::new("never runs").with_cancel(cancel))
        .await
        .unwrap();

    let status = wait_finished(&pool, 1).await;
    assert_eq!(status.metrics.cancelled_tasks, 1);
    assert_eq!(status.metrics.completed_tasks, 0);
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_enforced_limits_retry_failed_tasks() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(1));
    let config = PoolConfig {
        enforce_task_limits: true,
        ..fast_config()
    };
    let pool = AgentPool::builder(config, factory).start().unwrap();

    pool.submit(
        SubmitRequest::new("always fail")
            .with_kind(AgentKind::Tool)
            .with_max_retries(1),
    )
    .await
    .unwrap();

    let status = wait_finished(&pool, 1).await;
    assert_eq!(status.metrics.retried_tasks, 1);
    assert_eq!(status.metrics.failed_tasks, 1);
    assert_eq!(status.metrics.total_tasks, 1);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_tears_down_and_rejects_submissions() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(1));
    let pool = AgentPool::builder(fast_config(), factory.clone())
        .start()
        .unwrap();

    pool.submit_task("plan the week", TaskContext::new(), 1, None)
        .await
        .unwrap();
    wait_finished(&pool, 1).await;
    assert_eq!(factory.live.load(Ordering::SeqCst), 1);

    pool.shutdown().await.unwrap();
    assert_eq!(factory.live.load(Ordering::SeqCst), 0);
    assert_eq!(pool.status().await.total_instances, 0);

    let rejected = pool
        .submit_task("too late", TaskContext::new(), 1, None)
        .await;
    assert!(matches!(rejected, Err(PoolError::ShuttingDown)));

    // A second shutdown is a no-op.
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_times_out_on_long_running_task() {
    let factory = ScriptedFactory::with_latency(Duration::from_secs(30));
    let pool = AgentPool::builder(fast_config(), factory.clone())
        .start()
        .unwrap();

    pool.submit_task("plan the decade", TaskContext::new(), 1, None)
        .await
        .unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pool.status().await.active_tasks == 0 {
        assert!(tokio::time::Instant::now() < deadline, "task never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let limit = Duration::from_millis(200);
    let started = std::time::Instant::now();
    let result = pool.shutdown_within(limit).await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(PoolError::ShutdownTimeout(l)) if l == limit));
    assert!(elapsed >= limit);
    assert!(elapsed < Duration::from_secs(5), "shutdown took {elapsed:?}");

    let status = pool.status().await;
    assert_eq!(status.active_tasks, 0);
    assert_eq!(status.total_instances, 0);
    assert_eq!(status.metrics.failed_tasks, 1);

    // The interrupted agent never gets its teardown hook.
    assert_eq!(factory.live.load(Ordering::SeqCst), 1);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_maintenance_toggle_through_facade() {
    let factory = ScriptedFactory::with_latency(Duration::from_millis(1));
    let pool = AgentPool::builder(fast_config(), factory).start().unwrap();

    pool.submit(SubmitRequest::new("recall").with_kind(AgentKind::Memory))
        .await
        .unwrap();
    wait_finished(&pool, 1).await;

    let id = pool.instances(AgentKind::Memory).await[0].id.clone();
    pool.set_maintenance(&id, true).await.unwrap();
    assert_eq!(pool.status().await.kind(AgentKind::Memory).maintenance, 1);

    pool.set_maintenance(&id, false).await.unwrap();
    assert_eq!(pool.status().await.kind(AgentKind::Memory).idle, 1);

    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let factory = ScriptedFactory::with_latency(Duration::ZERO);
    let config = PoolConfig {
        max_agents_per_type: 0,
        ..Default::default()
    };
    let result = AgentPool::builder(config, factory).start();
    assert!(matches!(result, Err(PoolError::Config(_))));
}
