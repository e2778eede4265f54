//! Single Docker host. Containers are named after the application uuid.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::PlaneError;
use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::{OrchestratorTarget, OrchestratorType};
use crate::orchestrator::{mutate, read, Orchestrator, OrchestratorStatus, ResourceUsage, WorkloadState};
use crate::remote::RemoteExecutor;

#[derive(Debug)]
pub struct StandaloneOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
}

impl StandaloneOrchestrator {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    async fn inspect(&self, target: &OrchestratorTarget, container: &str, field: &str) -> Result<String, PlaneError> {
        read(
            &*self.executor,
            target,
            format!("docker inspect --format='{{{{{}}}}}' {}", field, container),
        )
        .await
    }
}

#[async_trait]
impl Orchestrator for StandaloneOrchestrator {
    fn orchestrator_type(&self) -> OrchestratorType {
        OrchestratorType::None
    }

    async fn deploy(
        &self,
        _target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        image: &str,
    ) -> Result<(), PlaneError> {
        // containers are started by the compose flow
        debug!("Standalone deploy of {} ({}) delegated to compose", app.identifier(), image);
        Ok(())
    }

    async fn scale(
        &self,
        _target: &OrchestratorTarget,
        _app: &ApplicationDeploymentSpec,
        _replicas: u32,
    ) -> Result<(), PlaneError> {
        Err(PlaneError::Unsupported(
            "Scaling is not supported for standalone Docker deployments. \
             Enable Docker Swarm or Kubernetes for scaling support."
                .to_string(),
        ))
    }

    async fn stop(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> Result<(), PlaneError> {
        mutate(
            &*self.executor,
            target,
            "stop",
            app,
            vec![format!("docker stop {}", app.identifier())],
        )
        .await?;
        Ok(())
    }

    async fn restart(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> Result<(), PlaneError> {
        mutate(
            &*self.executor,
            target,
            "restart",
            app,
            vec![format!("docker restart {}", app.identifier())],
        )
        .await?;
        Ok(())
    }

    async fn get_status(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> OrchestratorStatus {
        let container = app.identifier();
        match self.inspect(target, container, ".State.Status").await {
            Ok(state) => {
                let running = u32::from(state == "running");
                let state = if state == "running" {
                    WorkloadState::Running
                } else {
                    WorkloadState::Container(state)
                };
                OrchestratorStatus::new(running, 1, state).detail("container_name", container)
            }
            Err(e) => OrchestratorStatus::degraded(1, WorkloadState::NotFound, &e),
        }
    }

    async fn get_logs(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        lines: u32,
    ) -> Result<String, PlaneError> {
        self.executor
            .run(
                &target.host,
                &[format!("docker logs {} --tail {}", app.identifier(), lines)],
                true,
            )
            .await
            .map_err(|e| PlaneError::during("get logs", app.identifier(), e))
    }

    async fn execute(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        command: &str,
    ) -> Result<String, PlaneError> {
        mutate(
            &*self.executor,
            target,
            "execute",
            app,
            vec![format!("docker exec {} {}", app.identifier(), command)],
        )
        .await
    }

    async fn get_resources(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> ResourceUsage {
        let container = app.identifier();
        let command = format!(
            "docker stats {} --no-stream --format '{{{{.CPUPerc}}}}|{{{{.MemUsage}}}}'",
            container
        );
        match read(&*self.executor, target, command).await {
            Ok(output) => {
                let usage = match output.split_once('|') {
                    Some((cpu, memory)) => ResourceUsage::new(cpu.trim(), memory.trim()),
                    None => ResourceUsage::new("0%", "0B / 0B"),
                };
                usage.detail("container", container)
            }
            Err(e) => ResourceUsage::new("0%", "0B / 0B").with_error(&e),
        }
    }

    fn requires_registry(&self) -> bool {
        false
    }

    fn supports_additional_destinations(&self) -> bool {
        true
    }

    fn transform_compose_file(
        &self,
        compose: serde_yaml::Value,
        _app: &ApplicationDeploymentSpec,
    ) -> Result<serde_yaml::Value, PlaneError> {
        Ok(compose)
    }

    async fn perform_rolling_update(
        &self,
        _target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        compose_path: &str,
    ) -> Result<bool, PlaneError> {
        debug!("Standalone update of {} from {} delegated to compose", app.identifier(), compose_path);
        Ok(true)
    }

    async fn perform_health_check(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> bool {
        let container = app.identifier();
        let health = match self.inspect(target, container, ".State.Health.Status").await {
            Ok(health) => health,
            Err(_) => return false,
        };

        // no HEALTHCHECK defined
        if health.is_empty() || health == "<no value>" {
            return self
                .inspect(target, container, ".State.Status")
                .await
                .map(|state| state == "running")
                .unwrap_or(false);
        }
        health == "healthy"
    }
}
