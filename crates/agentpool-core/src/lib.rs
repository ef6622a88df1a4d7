//! AgentPool Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The async runtime
//! - Concrete agent implementations
//! - Transport or persistence layers
//!
//! All types here describe what the pool manages: tasks, agent kinds,
//! instance lifecycle states and the status snapshot reported to callers.

pub mod error;
pub mod ids;
pub mod kind;
pub mod snapshot;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{InstanceId, TaskId};
pub use kind::AgentKind;
pub use snapshot::{KindMetrics, KindUtilization, MetricsSnapshot, PoolStatus};
pub use status::InstanceStatus;
pub use task::{
    preferred_kind, requested_capability, TaskContext, TaskRequest, CAPABILITY_KEY,
    PREFERRED_AGENT_TYPE_KEY,
};
