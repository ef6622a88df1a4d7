//! Lifecycle status of an agent instance.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Status of one live agent instance.
///
/// ```text
/// Idle -> Busy            acquisition
/// Busy -> Idle | Error    completion
/// Error -> Idle           sweeper rehabilitation
/// Idle <-> Maintenance    operator drain
/// ```
///
/// Removal from the pool is only reachable from `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Instance is ready to accept a task.
    #[default]
    Idle,
    /// Instance is executing a task.
    Busy,
    /// Last execution failed; waiting for the error cooldown.
    Error,
    /// Instance is held out of rotation.
    Maintenance,
}

impl InstanceStatus {
    /// Returns true if the instance can be handed a task.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Busy)
                | (Self::Busy, Self::Idle)
                | (Self::Busy, Self::Error)
                | (Self::Error, Self::Idle)
                | (Self::Idle, Self::Maintenance)
                | (Self::Maintenance, Self::Idle)
        )
    }

    /// Validate a transition, returning the new status.
    pub fn transition(&self, next: InstanceStatus) -> Result<InstanceStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Maintenance => "maintenance",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use InstanceStatus::*;

        assert!(Idle.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Idle));
        assert!(Busy.can_transition_to(Error));
        assert!(Error.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Maintenance));
        assert!(Maintenance.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Error));
        assert!(!Error.can_transition_to(Busy));
        assert!(!Busy.can_transition_to(Busy));
        assert!(!Maintenance.can_transition_to(Busy));
        assert!(!Busy.can_transition_to(Maintenance));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = InstanceStatus::Error
            .transition(InstanceStatus::Busy)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidStateTransition {
                from: "error".to_string(),
                to: "busy".to_string(),
            }
        );
    }

    #[test]
    fn test_only_idle_is_available() {
        assert!(InstanceStatus::Idle.is_available());
        assert!(!InstanceStatus::Busy.is_available());
        assert!(!InstanceStatus::Error.is_available());
        assert!(!InstanceStatus::Maintenance.is_available());
    }
}
