//! Servers and applications known to the control plane

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::PlaneError;
use crate::filesys::file::File;
use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::{OrchestratorType, Server};

/// Persistence seam for orchestrators and the HTTP API
#[async_trait]
pub trait Inventory: Send + Sync + std::fmt::Debug {
    async fn server(&self, uuid: &str) -> Result<Server, PlaneError>;

    async fn application(&self, uuid: &str) -> Result<ApplicationDeploymentSpec, PlaneError>;

    /// Remember the replica count an orchestrator scaled `application_uuid` to
    async fn save_replicas(
        &self,
        application_uuid: &str,
        orchestrator: OrchestratorType,
        replicas: u32,
    ) -> Result<(), PlaneError>;
}

/// Inventory backed by a JSON document of the form
/// `{"servers": [...], "applications": [...]}`
#[derive(Debug)]
pub struct JsonInventory {
    file: Option<File>,
    document: RwLock<Value>,
}

impl JsonInventory {
    /// Load from disk. A missing file is an empty inventory.
    pub async fn load(file: File) -> Result<Self, PlaneError> {
        let document = if file.exists().await {
            file.read_json().await?
        } else {
            info!("Inventory file {} not found, starting empty", file.path().display());
            json!({"servers": [], "applications": []})
        };
        Ok(Self {
            file: Some(file),
            document: RwLock::new(document),
        })
    }

    /// Inventory that never touches disk
    pub fn in_memory(document: Value) -> Self {
        Self {
            file: None,
            document: RwLock::new(document),
        }
    }

    /// Snapshot of the current document
    pub async fn document(&self) -> Value {
        self.document.read().await.clone()
    }

    async fn find(&self, collection: &str, uuid: &str) -> Result<Value, PlaneError> {
        let document = self.document.read().await;
        document
            .get(collection)
            .and_then(|v| v.as_array())
            .and_then(|items| items.iter().find(|i| i["uuid"] == uuid))
            .cloned()
            .ok_or_else(|| PlaneError::NotFound(format!("{} {}", collection, uuid)))
    }
}

#[async_trait]
impl Inventory for JsonInventory {
    async fn server(&self, uuid: &str) -> Result<Server, PlaneError> {
        let value = self.find("servers", uuid).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn application(&self, uuid: &str) -> Result<ApplicationDeploymentSpec, PlaneError> {
        let value = self.find("applications", uuid).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn save_replicas(
        &self,
        application_uuid: &str,
        orchestrator: OrchestratorType,
        replicas: u32,
    ) -> Result<(), PlaneError> {
        let mut document = self.document.write().await;
        let app = document
            .get_mut("applications")
            .and_then(|v| v.as_array_mut())
            .and_then(|items| items.iter_mut().find(|i| i["uuid"] == application_uuid))
            .ok_or_else(|| PlaneError::NotFound(format!("applications {}", application_uuid)))?;

        match orchestrator {
            OrchestratorType::Swarm => app["swarm_replicas"] = json!(replicas),
            OrchestratorType::Kubernetes => {
                if !app["kubernetes"].is_object() {
                    app["kubernetes"] = json!({});
                }
                app["kubernetes"]["replicas"] = json!(replicas);
            }
            OrchestratorType::None => {
                return Err(PlaneError::ValidationError(
                    "standalone applications have no replica count".to_string(),
                ))
            }
        }
        debug!(application = %application_uuid, replicas, "Persisted replica count");

        if let Some(file) = &self.file {
            file.write_json(&*document).await?;
        }
        Ok(())
    }
}
