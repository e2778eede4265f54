//! Container orchestrator backends.
//!
//! One [`Orchestrator`] implementation per backend: plain Docker, Docker
//! Swarm and Kubernetes. Every remote effect is a shell command run through a
//! [`RemoteExecutor`] against the application's server.
//!
//! Mutating operations return `Result` and annotate failures with the
//! operation and application. Status and resource reads never fail; they
//! degrade to a zero-valued result carrying the error message so monitoring
//! loops keep running.

pub mod factory;
pub mod kubernetes;
pub mod manifests;
pub mod standalone;
pub mod swarm;
pub mod units;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::PlaneError;
use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::{OrchestratorTarget, OrchestratorType};
use crate::remote::{run_one, RemoteExecutor};

pub use factory::OrchestratorFactory;
pub use kubernetes::KubernetesOrchestrator;
pub use standalone::StandaloneOrchestrator;
pub use swarm::SwarmOrchestrator;

/// Coarse workload state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadState {
    Running,
    Updating,
    Stopped,
    NotFound,
    Error,
    Unknown,
    /// Raw container state reported by Docker, e.g. `exited`
    Container(String),
}

impl WorkloadState {
    pub fn as_str(&self) -> &str {
        match self {
            WorkloadState::Running => "running",
            WorkloadState::Updating => "updating",
            WorkloadState::Stopped => "stopped",
            WorkloadState::NotFound => "not_found",
            WorkloadState::Error => "error",
            WorkloadState::Unknown => "unknown",
            WorkloadState::Container(state) => state,
        }
    }
}

impl Serialize for WorkloadState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Replica counts and backend specific details
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: u32,
    pub desired: u32,
    #[serde(rename = "status")]
    pub state: WorkloadState,
    #[serde(flatten)]
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrchestratorStatus {
    pub fn new(running: u32, desired: u32, state: WorkloadState) -> Self {
        Self {
            running,
            desired,
            state,
            details: Map::new(),
            error: None,
        }
    }

    /// Zero running replicas, annotated with `error`
    pub fn degraded(desired: u32, state: WorkloadState, error: &PlaneError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(0, desired, state)
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkloadState::Running
    }
}

/// CPU and memory usage, formatted for display
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub cpu: String,
    pub memory: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceUsage {
    pub fn new(cpu: impl Into<String>, memory: impl Into<String>) -> Self {
        Self {
            cpu: cpu.into(),
            memory: memory.into(),
            details: Map::new(),
            error: None,
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_error(mut self, error: &PlaneError) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync + Debug {
    fn orchestrator_type(&self) -> OrchestratorType;

    /// Roll out `image` for the application
    async fn deploy(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        image: &str,
    ) -> Result<(), PlaneError>;

    /// Change the replica count and remember it for the next deployment
    async fn scale(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        replicas: u32,
    ) -> Result<(), PlaneError>;

    async fn stop(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> Result<(), PlaneError>;

    async fn restart(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> Result<(), PlaneError>;

    async fn get_status(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> OrchestratorStatus;

    /// Last `lines` log lines
    async fn get_logs(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        lines: u32,
    ) -> Result<String, PlaneError>;

    /// Run `command` inside one running instance of the application
    async fn execute(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        command: &str,
    ) -> Result<String, PlaneError>;

    async fn get_resources(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> ResourceUsage;

    /// Whether images must be pushed to a registry before deploying
    fn requires_registry(&self) -> bool;

    fn supports_additional_destinations(&self) -> bool;

    /// Adapt a generated compose file to this backend
    fn transform_compose_file(
        &self,
        compose: serde_yaml::Value,
        app: &ApplicationDeploymentSpec,
    ) -> Result<serde_yaml::Value, PlaneError>;

    /// Apply an updated deployment. Returns whether the rollout completed.
    async fn perform_rolling_update(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        compose_path: &str,
    ) -> Result<bool, PlaneError>;

    async fn perform_health_check(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> bool;
}

/// Run a mutating command batch, annotating failures with `operation`
pub(crate) async fn mutate(
    executor: &dyn RemoteExecutor,
    target: &OrchestratorTarget,
    operation: &str,
    app: &ApplicationDeploymentSpec,
    commands: Vec<String>,
) -> Result<String, PlaneError> {
    executor
        .run(&target.host, &commands, true)
        .await
        .map_err(|e| PlaneError::during(operation, app.identifier(), e))
}

/// Run one read-only command and return its trimmed output
pub(crate) async fn read(
    executor: &dyn RemoteExecutor,
    target: &OrchestratorTarget,
    command: String,
) -> Result<String, PlaneError> {
    run_one(executor, &target.host, command).await
}

/// Parse a `running/desired` pair such as `2/3` or `2/3 (max 1 per node)`
pub(crate) fn parse_replica_pair(value: &str) -> (u32, u32) {
    let pair = value.split_whitespace().next().unwrap_or_default();
    let mut parts = pair.splitn(2, '/');
    let running = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    let desired = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    (running, desired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replica_pair() {
        assert_eq!(parse_replica_pair("2/3"), (2, 3));
        assert_eq!(parse_replica_pair("1/1 (max 1 per node)"), (1, 1));
        assert_eq!(parse_replica_pair("/3"), (0, 3));
        assert_eq!(parse_replica_pair(""), (0, 0));
    }

    #[test]
    fn test_status_serializes_flat() {
        let status = OrchestratorStatus::new(1, 1, WorkloadState::Container("exited".to_string()))
            .detail("container_name", "abc");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "exited");
        assert_eq!(json["container_name"], "abc");
        assert!(json.get("error").is_none());
    }
}
