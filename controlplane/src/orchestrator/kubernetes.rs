//! Kubernetes via `kubectl` on the target host. All objects share the
//! application uuid as their name and are selected with `app=<uuid>`.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::apps::v1::Deployment;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::PlaneError;
use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::{OrchestratorTarget, OrchestratorType};
use crate::orchestrator::units::{parse_mebibytes, parse_millicores};
use crate::orchestrator::{manifests, mutate, read, Orchestrator, OrchestratorStatus, ResourceUsage, WorkloadState};
use crate::remote::RemoteExecutor;
use crate::storage::inventory::Inventory;
use crate::utils::generate_uuid;

const ROLLOUT_TIMEOUT_SECS: u64 = 300;

/// Derive the workload state from deployment replica counts
pub fn derive_state(ready: i32, available: i32, desired: i32, replicas: i32) -> WorkloadState {
    if replicas == 0 {
        WorkloadState::Stopped
    } else if ready == desired && available == desired {
        WorkloadState::Running
    } else if ready < desired {
        WorkloadState::Updating
    } else {
        WorkloadState::Unknown
    }
}

#[derive(Debug)]
pub struct KubernetesOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
    inventory: Arc<dyn Inventory>,
}

impl KubernetesOrchestrator {
    pub fn new(executor: Arc<dyn RemoteExecutor>, inventory: Arc<dyn Inventory>) -> Self {
        Self { executor, inventory }
    }

    /// Shell commands that write `manifest` to a temp file, apply it and
    /// remove the file
    fn apply_commands<T: Serialize>(manifest: &T, kind: &str, namespace: &str) -> Result<Vec<String>, PlaneError> {
        let yaml = serde_yaml::to_string(manifest)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(yaml);
        let path = format!("/tmp/keel-k8s-{}-{}.yaml", kind, generate_uuid());

        Ok(vec![
            format!("echo '{}' | base64 -d > {}", encoded, path),
            format!("kubectl apply -f {} -n {}", path, namespace),
            format!("rm {}", path),
        ])
    }

    async fn status(&self, target: &OrchestratorTarget, name: &str) -> Result<OrchestratorStatus, PlaneError> {
        let namespace = target.namespace();
        let output = read(
            &*self.executor,
            target,
            format!("kubectl get deployment {} -n {} -o json", name, namespace),
        )
        .await?;
        let deployment: Deployment = serde_json::from_str(&output)?;

        let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = deployment.status.unwrap_or_default();
        let ready = status.ready_replicas.unwrap_or(0);
        let replicas = status.replicas.unwrap_or(0);
        let available = status.available_replicas.unwrap_or(0);

        let conditions = serde_json::to_value(status.conditions.unwrap_or_default())?;
        Ok(OrchestratorStatus::new(
            u32::try_from(ready).unwrap_or(0),
            u32::try_from(desired).unwrap_or(0),
            derive_state(ready, available, desired, replicas),
        )
        .detail("deployment_name", name)
        .detail("namespace", namespace)
        .detail("replicas", replicas)
        .detail("available_replicas", available)
        .detail("conditions", conditions))
    }

    async fn resources(&self, target: &OrchestratorTarget, name: &str) -> Result<ResourceUsage, PlaneError> {
        let namespace = target.namespace();
        let output = read(
            &*self.executor,
            target,
            format!("kubectl top pods -n {} -l app={} --no-headers", namespace, name),
        )
        .await?;

        let mut cpu = 0u64;
        let mut memory = 0u64;
        let mut pods = 0u32;
        for line in output.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }
            cpu += parse_millicores(parts[1]);
            memory += parse_mebibytes(parts[2]);
            pods += 1;
        }

        Ok(ResourceUsage::new(format!("{}m", cpu), format!("{}Mi", memory))
            .detail("pods", pods)
            .detail("namespace", namespace))
    }

    async fn jsonpath(&self, target: &OrchestratorTarget, name: &str, path: &str) -> Result<String, PlaneError> {
        let output = read(
            &*self.executor,
            target,
            format!(
                "kubectl get deployment {} -n {} -o jsonpath='{}'",
                name,
                target.namespace(),
                path
            ),
        )
        .await?;
        Ok(output.trim_matches('\'').to_string())
    }
}

#[async_trait]
impl Orchestrator for KubernetesOrchestrator {
    fn orchestrator_type(&self) -> OrchestratorType {
        OrchestratorType::Kubernetes
    }

    async fn deploy(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        image: &str,
    ) -> Result<(), PlaneError> {
        let namespace = target.namespace();
        let service_type = target
            .service_type
            .as_deref()
            .unwrap_or(&app.kubernetes.service_type);

        let annotate = |e| PlaneError::during("deploy", app.identifier(), e);
        let mut commands = Self::apply_commands(&manifests::deployment(app, image), "deployment", namespace)
            .map_err(annotate)?;
        commands.extend(
            Self::apply_commands(&manifests::service(app, service_type), "service", namespace).map_err(annotate)?,
        );
        if let Some(ingress) = target.ingress.as_ref().and_then(|s| manifests::ingress(app, s)) {
            commands.extend(Self::apply_commands(&ingress, "ingress", namespace).map_err(annotate)?);
        }

        mutate(&*self.executor, target, "deploy", app, commands).await?;
        info!("Applied manifests for {} in namespace {}", app.identifier(), namespace);
        Ok(())
    }

    async fn scale(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        replicas: u32,
    ) -> Result<(), PlaneError> {
        let name = app.identifier();
        mutate(
            &*self.executor,
            target,
            "scale",
            app,
            vec![format!(
                "kubectl scale deployment {} --replicas={} -n {}",
                name,
                replicas,
                target.namespace()
            )],
        )
        .await?;

        self.inventory
            .save_replicas(name, OrchestratorType::Kubernetes, replicas)
            .await
            .map_err(|e| PlaneError::during("scale", name, e))?;
        info!("Scaled deployment {} to {} replicas", name, replicas);
        Ok(())
    }

    async fn stop(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> Result<(), PlaneError> {
        mutate(
            &*self.executor,
            target,
            "stop",
            app,
            vec![format!(
                "kubectl scale deployment {} --replicas=0 -n {}",
                app.identifier(),
                target.namespace()
            )],
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
            vec![format!(
                "kubectl rollout restart deployment/{} -n {}",
                app.identifier(),
                target.namespace()
            )],
        )
        .await?;
        Ok(())
    }

    async fn get_status(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> OrchestratorStatus {
        match self.status(target, app.identifier()).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to read deployment {}: {}", app.identifier(), e);
                OrchestratorStatus::degraded(app.kubernetes.replicas, WorkloadState::NotFound, &e)
            }
        }
    }

    async fn get_logs(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        lines: u32,
    ) -> Result<String, PlaneError> {
        let command = format!(
            "kubectl logs -n {} -l app={} --tail={} --all-containers=true",
            target.namespace(),
            app.identifier(),
            lines
        );
        self.executor
            .run(&target.host, &[command], true)
            .await
            .map_err(|e| PlaneError::during("get logs", app.identifier(), e))
    }

    async fn execute(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        command: &str,
    ) -> Result<String, PlaneError> {
        let namespace = target.namespace();
        let pod = read(
            &*self.executor,
            target,
            format!(
                "kubectl get pods -n {} -l app={} -o jsonpath='{{.items[0].metadata.name}}'",
                namespace,
                app.identifier()
            ),
        )
        .await
        .map_err(|e| PlaneError::during("execute", app.identifier(), e))?;

        let pod = pod.trim_matches('\'');
        if pod.is_empty() {
            return Err(PlaneError::OrchestratorError {
                operation: "execute".to_string(),
                target: app.identifier().to_string(),
                message: "No running pods found for deployment".to_string(),
            });
        }

        mutate(
            &*self.executor,
            target,
            "execute",
            app,
            vec![format!("kubectl exec {} -n {} -- {}", pod, namespace, command)],
        )
        .await
    }

    async fn get_resources(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> ResourceUsage {
        match self.resources(target, app.identifier()).await {
            Ok(usage) => usage,
            Err(e) => ResourceUsage::new("0m", "0Mi").detail("pods", 0).with_error(&e),
        }
    }

    fn requires_registry(&self) -> bool {
        false
    }

    fn supports_additional_destinations(&self) -> bool {
        false
    }

    /// Kubernetes deploys from generated manifests; compose files pass through
    fn transform_compose_file(
        &self,
        compose: serde_yaml::Value,
        _app: &ApplicationDeploymentSpec,
    ) -> Result<serde_yaml::Value, PlaneError> {
        Ok(compose)
    }

    async fn perform_rolling_update(
        &self,
        target: &OrchestratorTarget,
        app: &ApplicationDeploymentSpec,
        _compose_path: &str,
    ) -> Result<bool, PlaneError> {
        let output = mutate(
            &*self.executor,
            target,
            "rolling update",
            app,
            vec![format!(
                "kubectl rollout status deployment/{} -n {} --timeout={}s",
                app.identifier(),
                target.namespace(),
                ROLLOUT_TIMEOUT_SECS
            )],
        )
        .await?;
        Ok(output.contains("successfully rolled out"))
    }

    async fn perform_health_check(&self, target: &OrchestratorTarget, app: &ApplicationDeploymentSpec) -> bool {
        let name = app.identifier();
        let available = match self
            .jsonpath(target, name, "{.status.conditions[?(@.type==\"Available\")].status}")
            .await
        {
            Ok(available) => available,
            Err(_) => return false,
        };
        let replicas = match self
            .jsonpath(target, name, "{.status.readyReplicas}/{.spec.replicas}")
            .await
        {
            Ok(replicas) => replicas,
            Err(_) => return false,
        };

        let (ready, desired) = crate::orchestrator::parse_replica_pair(&replicas);
        available == "True" && ready == desired && ready > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::IngressSettings;
    use crate::remote::{RecordingExecutor, RemoteHost};
    use crate::storage::inventory::JsonInventory;
    use serde_json::json;

    fn target(ingress: bool) -> OrchestratorTarget {
        OrchestratorTarget {
            orchestrator: OrchestratorType::Kubernetes,
            host: RemoteHost::new("cp", "10.0.0.3"),
            namespace: Some("apps".to_string()),
            service_type: Some("ClusterIP".to_string()),
            ingress: ingress.then(|| IngressSettings {
                class: "nginx".to_string(),
                cluster_issuer: "letsencrypt-prod".to_string(),
            }),
        }
    }

    fn app() -> ApplicationDeploymentSpec {
        let mut app = ApplicationDeploymentSpec::new(9, "k8sapp", "shop", "shop:1");
        app.fqdn = Some("https://shop.example.com".to_string());
        app
    }

    fn orchestrator(executor: RecordingExecutor) -> (KubernetesOrchestrator, Arc<RecordingExecutor>, Arc<JsonInventory>) {
        let executor = Arc::new(executor);
        let inventory = Arc::new(JsonInventory::in_memory(json!({
            "applications": [{"id": 9, "uuid": "k8sapp", "name": "shop", "image": "shop:1"}]
        })));
        (
            KubernetesOrchestrator::new(executor.clone(), inventory.clone()),
            executor,
            inventory,
        )
    }

    fn deployment_json(ready: i32, available: i32, desired: i32, replicas: i32) -> String {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "k8sapp"},
            "spec": {
                "replicas": desired,
                "selector": {"matchLabels": {"app": "k8sapp"}},
                "template": {"spec": {"containers": [{"name": "k8sapp"}]}}
            },
            "status": {
                "readyReplicas": ready,
                "availableReplicas": available,
                "replicas": replicas,
                "conditions": [{"type": "Available", "status": "True"}]
            }
        })
        .to_string()
    }

    #[test]
    fn test_derive_state() {
        assert_eq!(derive_state(3, 3, 3, 3), WorkloadState::Running);
        assert_eq!(derive_state(1, 1, 3, 3), WorkloadState::Updating);
        assert_eq!(derive_state(0, 0, 0, 0), WorkloadState::Stopped);
        assert_eq!(derive_state(0, 0, 3, 0), WorkloadState::Stopped);
    }

    #[tokio::test]
    async fn test_status_from_deployment_json() {
        let (k8s, executor, _) = orchestrator(
            RecordingExecutor::new().respond("get deployment", &deployment_json(1, 1, 3, 3)),
        );
        let status = k8s.get_status(&target(false), &app()).await;

        assert_eq!(status.state, WorkloadState::Updating);
        assert_eq!(status.running, 1);
        assert_eq!(status.desired, 3);
        assert_eq!(status.details["namespace"], "apps");
        assert_eq!(
            executor.calls(),
            vec!["kubectl get deployment k8sapp -n apps -o json"]
        );
    }

    #[tokio::test]
    async fn test_status_degrades_when_missing() {
        let (k8s, _, _) = orchestrator(RecordingExecutor::new().fail("get deployment", "NotFound"));
        let status = k8s.get_status(&target(false), &app()).await;
        assert_eq!(status.state, WorkloadState::NotFound);
        assert_eq!(status.running, 0);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn test_deploy_applies_all_manifests() {
        let (k8s, executor, _) = orchestrator(RecordingExecutor::new());
        k8s.deploy(&target(true), &app(), "shop:2").await.unwrap();

        let applies = executor.calls_matching("kubectl apply");
        assert_eq!(applies.len(), 3);
        assert!(applies[0].contains("/tmp/keel-k8s-deployment-"));
        assert!(applies[2].contains("/tmp/keel-k8s-ingress-"));
        assert!(applies.iter().all(|c| c.ends_with("-n apps")));
        assert_eq!(executor.calls_matching("rm /tmp/keel-k8s-").len(), 3);

        let (k8s, executor, _) = orchestrator(RecordingExecutor::new());
        k8s.deploy(&target(false), &app(), "shop:2").await.unwrap();
        assert_eq!(executor.calls_matching("kubectl apply").len(), 2);
    }

    #[tokio::test]
    async fn test_scale_persists_replicas() {
        let (k8s, executor, inventory) = orchestrator(RecordingExecutor::new());
        k8s.scale(&target(false), &app(), 5).await.unwrap();

        assert_eq!(
            executor.calls(),
            vec!["kubectl scale deployment k8sapp --replicas=5 -n apps"]
        );
        assert_eq!(
            inventory.document().await["applications"][0]["kubernetes"]["replicas"],
            5
        );
    }

    #[tokio::test]
    async fn test_resources_sum_pods() {
        let (k8s, _, _) = orchestrator(RecordingExecutor::new().respond(
            "kubectl top pods",
            "k8sapp-a   150m   200Mi\nk8sapp-b   1      1Gi\n",
        ));
        let usage = k8s.get_resources(&target(false), &app()).await;
        assert_eq!(usage.cpu, "1150m");
        assert_eq!(usage.memory, "1224Mi");
        assert_eq!(usage.details["pods"], 2);
    }

    #[tokio::test]
    async fn test_rolling_update_and_health() {
        let (k8s, _, _) = orchestrator(
            RecordingExecutor::new()
                .respond("rollout status", "deployment \"k8sapp\" successfully rolled out")
                .respond("type==\"Available\"", "'True'")
                .respond("readyReplicas", "'2/2'"),
        );
        assert!(k8s.perform_rolling_update(&target(false), &app(), "").await.unwrap());
        assert!(k8s.perform_health_check(&target(false), &app()).await);
    }

    #[tokio::test]
    async fn test_execute_without_pods() {
        let (k8s, _, _) = orchestrator(RecordingExecutor::new().respond("get pods", "''"));
        let err = k8s.execute(&target(false), &app(), "ls").await.unwrap_err();
        assert!(err.to_string().contains("No running pods"));
    }
}
