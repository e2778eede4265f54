//! Server state

use std::sync::Arc;
use std::time::Duration;

use crate::dns::DnsProviderFactory;
use crate::errors::PlaneError;
use crate::events::{EventSink, Notifier, WebhookSender};
use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::{OrchestratorTarget, Server};
use crate::orchestrator::{Orchestrator, OrchestratorFactory};
use crate::storage::inventory::Inventory;
use crate::workers::scheduler::CertificateScheduler;

/// Server state shared across handlers
#[derive(Debug)]
pub struct ServerState {
    pub inventory: Arc<dyn Inventory>,
    pub orchestrators: OrchestratorFactory,
    pub dns_providers: DnsProviderFactory,
    pub scheduler: Arc<CertificateScheduler>,
    /// Timeout for webhook deliveries
    pub webhook_timeout: Duration,
}

/// An application together with everything needed to act on it
pub struct Resolved {
    pub app: ApplicationDeploymentSpec,
    pub server: Server,
    pub target: OrchestratorTarget,
    pub orchestrator: Arc<dyn Orchestrator>,
}

impl ServerState {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        orchestrators: OrchestratorFactory,
        dns_providers: DnsProviderFactory,
        scheduler: Arc<CertificateScheduler>,
        webhook_timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            orchestrators,
            dns_providers,
            scheduler,
            webhook_timeout,
        }
    }

    /// Look up an application, its server and the backend that runs it
    pub async fn resolve(&self, application_uuid: &str) -> Result<Resolved, PlaneError> {
        let app = self.inventory.application(application_uuid).await?;
        let server = self.inventory.server(&app.server_uuid).await?;
        let target = OrchestratorTarget::resolve(&server, &app);
        let orchestrator = self.orchestrators.make(&server);
        Ok(Resolved {
            app,
            server,
            target,
            orchestrator,
        })
    }

    /// Event sink delivering to the server's webhook, if one is configured
    pub fn sink_for(&self, server: &Server) -> Result<Arc<dyn EventSink>, PlaneError> {
        let webhook = WebhookSender::from_settings(&server.settings, self.webhook_timeout)?;
        Ok(Arc::new(Notifier::new(webhook)))
    }
}
