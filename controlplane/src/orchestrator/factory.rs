//! Orchestrator selection from server settings

use std::sync::Arc;

use tracing::debug;

use crate::models::server::{OrchestratorType, Server};
use crate::orchestrator::{KubernetesOrchestrator, Orchestrator, StandaloneOrchestrator, SwarmOrchestrator};
use crate::remote::RemoteExecutor;
use crate::storage::inventory::Inventory;

/// Factory for creating orchestrators
#[derive(Debug, Clone)]
pub struct OrchestratorFactory {
    executor: Arc<dyn RemoteExecutor>,
    inventory: Arc<dyn Inventory>,
}

impl OrchestratorFactory {
    pub fn new(executor: Arc<dyn RemoteExecutor>, inventory: Arc<dyn Inventory>) -> Self {
        Self { executor, inventory }
    }

    /// Orchestrator for the server's current settings. Not cached: a server
    /// may switch backends between deployments.
    pub fn make(&self, server: &Server) -> Arc<dyn Orchestrator> {
        let orchestrator = server.settings.orchestrator;
        debug!(server = %server.uuid, orchestrator = orchestrator.as_str(), "Selecting orchestrator");

        let orchestrator: Arc<dyn Orchestrator> = match orchestrator {
            OrchestratorType::None => Arc::new(StandaloneOrchestrator::new(self.executor.clone())),
            OrchestratorType::Swarm => Arc::new(SwarmOrchestrator::new(
                self.executor.clone(),
                self.inventory.clone(),
            )),
            OrchestratorType::Kubernetes => Arc::new(KubernetesOrchestrator::new(
                self.executor.clone(),
                self.inventory.clone(),
            )),
        };

        orchestrator
    }

    pub fn uses_orchestration(server: &Server) -> bool {
        server.settings.orchestrator.uses_orchestration()
    }

    pub fn can_scale(server: &Server) -> bool {
        Self::uses_orchestration(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RecordingExecutor;
    use crate::storage::inventory::JsonInventory;
    use serde_json::json;

    fn server(orchestrator: &str) -> Server {
        serde_json::from_value(json!({
            "uuid": "srv", "name": "edge", "ip": "10.0.0.9",
            "settings": {"orchestrator": orchestrator}
        }))
        .unwrap()
    }

    fn factory() -> OrchestratorFactory {
        OrchestratorFactory::new(
            Arc::new(RecordingExecutor::new()),
            Arc::new(JsonInventory::in_memory(json!({}))),
        )
    }

    #[test]
    fn test_make_by_setting() {
        let factory = factory();
        assert_eq!(factory.make(&server("none")).orchestrator_type(), OrchestratorType::None);
        assert_eq!(factory.make(&server("swarm")).orchestrator_type(), OrchestratorType::Swarm);
        assert_eq!(
            factory.make(&server("kubernetes")).orchestrator_type(),
            OrchestratorType::Kubernetes
        );
        assert_eq!(factory.make(&server("")).orchestrator_type(), OrchestratorType::None);
    }

    #[test]
    fn test_predicates() {
        assert!(!OrchestratorFactory::can_scale(&server("none")));
        assert!(OrchestratorFactory::can_scale(&server("swarm")));
        assert!(OrchestratorFactory::uses_orchestration(&server("kubernetes")));
    }
}
