//! Docker Swarm. Each application is a stack whose service is named after
//! the application uuid.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use serde_yaml::Mapping;
use tracing::{debug, info, warn};

use crate::errors::PlaneError;
use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::{OrchestratorTarget, OrchestratorType};
use crate::orchestrator::units::{format_megabytes, parse_memory_usage, parse_percent};
use crate::orchestrator::{
    mutate, parse_replica_pair, read, Orchestrator, OrchestratorStatus, ResourceUsage, WorkloadState,
};
use crate::remote::RemoteExecutor;
use crate::storage::inventory::Inventory;

/// Keys that only make sense for `docker compose up`
const STANDALONE_ONLY_KEYS: [&str; 4] = ["container_name", "expose", "restart", "labels"];

#[derive(Debug)]
pub struct SwarmOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
    inventory: Arc<dyn Inventory>,
}

impl SwarmOrchestrator {
    pub fn new(executor: Arc<dyn RemoteExecutor>, inventory: Arc<dyn Inventory>) -> Self {
        Self { executor, inventory }
    }

    async fn container_for_task(&self, target: &OrchestratorTarget, task_id: &str) -> Result<String, PlaneError> {
        read(
            &*self.executor,
            target,
            format!(
                "docker inspect --format '{{{{.Status.ContainerStatus.ContainerID}}}}' {}",
                task_id
            ),
        )
        .await
    }

    async fn running_tasks(&self, target: &OrchestratorTarget, service: &str) -> Result<Vec<Value>, PlaneError> {
        let output = read(
            &*self.executor,
            target,
            format!(
                "docker service ps {} --format '{{{{json .}}}}' --filter 'desired-state=running'",
                service
            ),
        )
        .await?;

        Ok(output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }

    async fn status(&self, target: &OrchestratorTarget, service: &str, fallback_desired: u32) -> Result<OrchestratorStatus, PlaneError> {
        let output = read(
            &*self.executor,
            target,
            format!(
                "docker service ls --filter 'name={}' --format '{{{{json .}}}}'",
                service
            ),
        )
        .await?;

        let Some(line) = output.lines().find(|l| !l.trim().is_empty()) else {
            return Ok(OrchestratorStatus::new(0, fallback_desired, WorkloadState::NotFound));
        };
        let info: Value = serde_json::from_str(line)?;
        let (running, desired) = parse_replica_pair(info["Replicas"].as_str().unwrap_or("0/0"));

        let tasks = self.running_tasks(target, service).await?;
        let running_tasks = tasks
            .iter()
            .filter(|t| t["CurrentState"].as_str().unwrap_or_default().starts_with("Running"))
            .count() as u32;

        let state = if running_tasks == desired {
            WorkloadState::Running
        } else {
            WorkloadState::Updating
        };

        Ok(OrchestratorStatus::new(running, desired, state)
            .detail("service_name", service)
            .detail("tasks", Value::Array(tasks))
            .detail("mode", info["Mode"].as_str().unwrap_or("replicated")))
    }

    /// Returns `(cpu percent, used MB, limit MB)` for one task
    async fn task_usage(&self, target: &OrchestratorTarget, task_id: &str) -> Result<Option<(f64, f64, f64)>, PlaneError> {
        let container = self.container_for_task(target, task_id).await?;
        if container.is_empty() {
            return Ok(None);
        }

        let output = read(
            &*self.executor,
            target,
            format!(
                "docker stats {} --no-stream --format '{{{{.CPUPerc}}}}|{{{{.MemUsage}}}}'",
                container
            ),
        )
        .await?;

        let Some((cpu, memory)) = output.split_once('|') else {
            return Ok(None);
        };
        let (used, limit) = parse_memory_usage(memory).unwrap_or((0.0, 0.0));
        Ok(Some((parse_percent(cpu), used, limit)))
    }

    async fn resources(&self, target: &OrchestratorTarget, service: &str) -> Result<ResourceUsage, PlaneError> {
        let output = read(
            &*self.executor,
            target,
            format!(
                "docker service ps {} --format '{{{{.ID}}}}' --filter 'desired-state=running'",
                service
            ),
        )
        .await?;

        let mut total_cpu = 0.0;
        let mut used = 0.0;
        let mut limit = 0.0;
        let mut tasks = 0u32;

        let task_ids: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let usages = join_all(task_ids.iter().map(|id| self.task_usage(target, id))).await;

        for (task_id, usage) in task_ids.iter().zip(usages) {
            match usage {
                Ok(Some((cpu, task_used, task_limit))) => {
                    total_cpu += cpu;
                    used += task_used;
                    limit += task_limit;
                    tasks += 1;
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping task {}: {}", task_id, e),
            }
        }

        if tasks == 0 {
            return Ok(ResourceUsage::new("0%", "0B / 0B").detail("tasks", 0));
        }

        let round = |v: f64| (v * 100.0).round() / 100.0;
        Ok(ResourceUsage::new(
            format!("{}% (avg per task)", round(total_cpu / f64::from(tasks))),
            format!("{} / {}", format_megabytes(used), format_megabytes(limit)),
        )
        .detail("tasks", tasks)
        .detail("total_cpu", round(total_cpu)))
    }

    fn deploy_section(app: &ApplicationDeploymentSpec) -> Value {
        let mut deploy = json!({
            "mode": "replicated",
            "replicas": app.swarm_replicas,
            "update_config": {
                "parallelism": 1,
                "delay": "10s",
                "order": "start-first",
            },
            "rollback_config": {
                "parallelism": 1,
                "delay": "5s",
            },
            "restart_policy": {
                "condition": "any",
                "delay": "5s",
                "max_attempts": 3,
            },
        });

        if !app.placement_constraints.is_empty() {
            deploy["placement"] = json!({ "constraints": app.placement_constraints });
        }

        let limits = &app.limits;
        if let Some(cpus) = limits.cpus() {
            deploy["resources"]["limits"]["cpus"] = json!(cpus);
        }
        if let Some(memory) = limits.memory() {
            deploy["resources"]["limits"]["memory"] = json!(memory);
        }
        if let Some(cpus) = limits.cpu_reservation() {
            deploy["resources"]["reservations"]["cpus"] = json!(cpus);
        }
        if let Some(memory) = limits.memory_reservation() {
            deploy["resources"]["reservations"]["memory"] = json!(memory);
        }

        deploy
    }
}

#[async_trait]
impl Orchestrator for SwarmOrchestrator {
    fn orchestrator_type(&self) -> OrchestratorType {
        OrchestratorType::Swarm
    }

    async fn deploy(
        &self,
        _target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        image: &str,
    ) -> Result<(), PlaneError> {
        // services are created by `docker stack deploy`, see perform_rolling_update
        debug!("Swarm deploy of {} ({}) delegated to stack deploy", app.identifier(), image);
        Ok(())
    }

    async fn scale(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        replicas: u32,
    ) -> Result<(), PlaneError> {
        let service = app.identifier();
        mutate(
            &*self.executor,
            target,
            "scale",
            app,
            vec![format!("docker service scale {}={}", service, replicas)],
        )
        .await?;

        self.inventory
            .save_replicas(service, OrchestratorType::Swarm, replicas)
            .await
            .map_err(|e| PlaneError::during("scale", service, e))?;
        info!("Scaled service {} to {} replicas", service, replicas);
        Ok(())
    }

    async fn stop(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> Result<(), PlaneError> {
        mutate(
            &*self.executor,
            target,
            "stop",
            app,
            vec![format!("docker service scale {}=0", app.identifier())],
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
            vec![format!("docker service update --force {}", app.identifier())],
        )
        .await?;
        Ok(())
    }

    async fn get_status(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> OrchestratorStatus {
        match self.status(target, app.identifier(), app.swarm_replicas).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to read status of service {}: {}", app.identifier(), e);
                OrchestratorStatus::degraded(app.swarm_replicas, WorkloadState::Error, &e)
            }
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
                &[format!("docker service logs {} --tail {}", app.identifier(), lines)],
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
        let service = app.identifier();
        let fail = |message: &str| PlaneError::OrchestratorError {
            operation: "execute".to_string(),
            target: service.to_string(),
            message: message.to_string(),
        };

        let task_id = read(
            &*self.executor,
            target,
            format!(
                "docker service ps {} -q --filter 'desired-state=running' | head -1",
                service
            ),
        )
        .await
        .map_err(|e| PlaneError::during("execute", service, e))?;
        if task_id.is_empty() {
            return Err(fail("No running tasks found for service"));
        }

        let container = self
            .container_for_task(target, &task_id)
            .await
            .map_err(|e| PlaneError::during("execute", service, e))?;
        if container.is_empty() {
            return Err(fail("Could not find container for task"));
        }

        mutate(
            &*self.executor,
            target,
            "execute",
            app,
            vec![format!("docker exec {} {}", container, command)],
        )
        .await
    }

    async fn get_resources(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> ResourceUsage {
        match self.resources(target, app.identifier()).await {
            Ok(usage) => usage,
            Err(e) => ResourceUsage::new("0%", "0B / 0B").with_error(&e),
        }
    }

    fn requires_registry(&self) -> bool {
        true
    }

    fn supports_additional_destinations(&self) -> bool {
        false
    }

    fn transform_compose_file(
        &self,
        mut compose: serde_yaml::Value,
        app: &ApplicationDeploymentSpec,
    ) -> Result<serde_yaml::Value, PlaneError> {
        let deploy = serde_yaml::to_value(Self::deploy_section(app))?;

        let serde_yaml::Value::Mapping(root) = &mut compose else {
            return Err(PlaneError::ValidationError(
                "compose file must be a mapping".to_string(),
            ));
        };
        if !root.contains_key("services") {
            root.insert("services".into(), Mapping::new().into());
        }
        let Some(serde_yaml::Value::Mapping(services)) = root.get_mut("services") else {
            return Err(PlaneError::ValidationError(
                "compose services must be a mapping".to_string(),
            ));
        };

        let name = app.identifier();
        if !services.contains_key(name) {
            services.insert(name.into(), Mapping::new().into());
        }
        if let Some(serde_yaml::Value::Mapping(service)) = services.get_mut(name) {
            for key in STANDALONE_ONLY_KEYS {
                service.remove(key);
            }
            service.insert("deploy".into(), deploy);
        }

        Ok(compose)
    }

    async fn perform_rolling_update(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        compose_path: &str,
    ) -> Result<bool, PlaneError> {
        mutate(
            &*self.executor,
            target,
            "rolling update",
            app,
            vec![format!(
                "docker stack deploy --detach=true --with-registry-auth -c {} {}",
                compose_path,
                app.identifier()
            )],
        )
        .await?;
        Ok(true)
    }

    async fn perform_health_check(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> bool {
        let output = read(
            &*self.executor,
            target,
            format!(
                "docker service ls --filter 'name={}' --format '{{{{.Replicas}}}}'",
                app.identifier()
            ),
        )
        .await;

        match output {
            Ok(replicas) if !replicas.is_empty() => {
                let (running, desired) = parse_replica_pair(&replicas);
                running == desired && running > 0
            }
            _ => false,
        }
    }
}
