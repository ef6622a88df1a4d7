//! AgentPool Runtime Library
//!
//! This crate provides the concurrent side of AgentPool: task intake and
//! priority ordering, load-aware type selection, bounded instance
//! creation and reuse, the dispatcher and cleanup loops, and metrics.
//!
//! Callers only need [`AgentPool`]; the remaining modules are public so the
//! pieces can be tested and replaced individually.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod event;
pub mod instance;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod selector;
pub mod state;
pub mod sweeper;

pub use agent::{Agent, AgentConfig, AgentError, AgentFactory, AgentResponse, FactoryError};
pub use config::{ConfigError, PoolConfig};
pub use event::PoolEvent;
pub use instance::{InstanceInfo, InstanceLease, Release};
pub use manager::{InstanceManager, SweepReport};
pub use metrics::{render_prometheus, MetricsAggregator};
pub use pool::{AgentPool, PoolBuilder, PoolError, SubmitRequest};
pub use registry::AgentRegistry;
pub use selector::{KeywordSelector, LoadView, TypeSelector};
