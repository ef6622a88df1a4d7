//! Startup-built table mapping each agent kind to its constructor.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, warn};

use agentpool_core::AgentKind;

use crate::agent::{Agent, AgentConfig, AgentFactory, FactoryError};

/// Constructor for one agent kind.
pub type AgentConstructor =
    Box<dyn Fn(&AgentConfig) -> Result<Box<dyn Agent>, FactoryError> + Send + Sync>;

/// [`AgentFactory`] backed by an explicit `AgentKind -> constructor` table.
#[derive(Default)]
pub struct AgentRegistry {
    constructors: BTreeMap<AgentKind, AgentConstructor>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to register the constructor for `kind`.
    ///
    /// A later registration for the same kind replaces the earlier one.
    pub fn register<F>(mut self, kind: AgentKind, constructor: F) -> Self
    where
        F: Fn(&AgentConfig) -> Result<Box<dyn Agent>, FactoryError> + Send + Sync + 'static,
    {
        if self.constructors.insert(kind, Box::new(constructor)).is_some() {
            warn!(kind = %kind, "Replacing registered agent constructor");
        }
        self
    }

    /// Builder method to register one constructor for every kind.
    pub fn register_all<F>(mut self, constructor: F) -> Self
    where
        F: Fn(&AgentConfig) -> Result<Box<dyn Agent>, FactoryError>
            + Clone
            + Send
            + Sync
            + 'static,
    {
        for kind in AgentKind::ALL {
            self = self.register(kind, constructor.clone());
        }
        self
    }

    /// Registered kinds in scan order.
    pub fn registered_kinds(&self) -> Vec<AgentKind> {
        self.constructors.keys().copied().collect()
    }

    /// Capabilities published by the registered kinds, without duplicates.
    pub fn capabilities(&self) -> Vec<&'static str> {
        let mut capabilities: Vec<&'static str> = Vec::new();
        for kind in self.constructors.keys() {
            for capability in kind.capabilities() {
                if !capabilities.contains(capability) {
                    capabilities.push(capability);
                }
            }
        }
        capabilities
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("kinds", &self.registered_kinds())
            .finish()
    }
}

#[async_trait]
impl AgentFactory for AgentRegistry {
    async fn create(
        &self,
        kind: AgentKind,
        config: &AgentConfig,
    ) -> Result<Box<dyn Agent>, FactoryError> {
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or(FactoryError::Unsupported(kind))?;

        debug!(kind = %kind, instance_id = %config.instance_id, "Constructing agent");
        constructor(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, AgentResponse};
    use agentpool_core::{InstanceId, TaskContext};
    use std::collections::HashMap;

    struct Named(String);

    #[async_trait]
    impl Agent for Named {
        async fn respond(
            &mut self,
            _message: &str,
            _context: &TaskContext,
        ) -> Result<AgentResponse, AgentError> {
            Ok(AgentResponse::text(self.0.clone()))
        }
    }

    fn config(kind: AgentKind) -> AgentConfig {
        AgentConfig {
            instance_id: InstanceId::for_kind(kind),
            kind,
            settings: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_registered_kind() {
        let registry = AgentRegistry::new().register(AgentKind::Tool, |config| {
            Ok(Box::new(Named(config.instance_id.to_string())) as Box<dyn Agent>)
        });

        let cfg = config(AgentKind::Tool);
        let mut agent = registry.create(AgentKind::Tool, &cfg).await.unwrap();
        let response = agent.respond("hi", &TaskContext::new()).await.unwrap();
        assert_eq!(response.content, cfg.instance_id.as_str());
    }

    #[tokio::test]
    async fn test_create_unregistered_kind_is_unsupported() {
        let registry = AgentRegistry::new();
        let result = registry
            .create(AgentKind::Goal, &config(AgentKind::Goal))
            .await;
        assert!(matches!(result, Err(FactoryError::Unsupported(AgentKind::Goal))));
    }

    #[test]
    fn test_register_all_and_capabilities() {
        let registry = AgentRegistry::new()
            .register_all(|_| Ok(Box::new(Named(String::new())) as Box<dyn Agent>));

        assert_eq!(registry.registered_kinds(), AgentKind::ALL.to_vec());
        let capabilities = registry.capabilities();
        assert!(capabilities.contains(&"sentiment_analysis"));
        assert!(capabilities.contains(&"task_orchestration"));
    }
}
