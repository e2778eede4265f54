//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, RemoteOptions};
use crate::certs::CertificatePoller;
use crate::dns::propagation::HickoryTxtResolver;
use crate::dns::{DnsProviderFactory, ProviderContext};
use crate::errors::PlaneError;
use crate::orchestrator::OrchestratorFactory;
use crate::remote::{LocalExecutor, RemoteExecutor, SshExecutor};
use crate::server::state::ServerState;
use crate::storage::inventory::{Inventory, JsonInventory};
use crate::storage::settings::RemoteMode;
use crate::workers::scheduler::CertificateScheduler;

/// Main application state
#[derive(Debug)]
pub struct AppState {
    /// Runs commands on managed servers
    pub executor: Arc<dyn RemoteExecutor>,

    /// Servers and applications
    pub inventory: Arc<dyn Inventory>,

    pub orchestrators: OrchestratorFactory,

    pub dns_providers: DnsProviderFactory,

    /// Pending certificate status checks
    pub scheduler: Arc<CertificateScheduler>,
}

pub fn make_executor(options: &RemoteOptions) -> Arc<dyn RemoteExecutor> {
    match options.mode {
        RemoteMode::Ssh => Arc::new(SshExecutor::new(options.ssh.clone())),
        RemoteMode::Local => Arc::new(LocalExecutor),
    }
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, PlaneError> {
        info!("Initializing application state...");

        let inventory_file = options
            .storage
            .layout
            .inventory_file(&options.storage.inventory_file);
        let inventory: Arc<dyn Inventory> = Arc::new(JsonInventory::load(inventory_file).await?);

        let executor = make_executor(&options.remote);
        Ok(Self::with_parts(options, executor, inventory))
    }

    /// State over an existing executor and inventory
    pub fn with_parts(
        options: &AppOptions,
        executor: Arc<dyn RemoteExecutor>,
        inventory: Arc<dyn Inventory>,
    ) -> Self {
        let mut context = ProviderContext::new(Arc::new(HickoryTxtResolver::new(&options.dns.nameservers)));
        context.http_timeout = options.dns.http_timeout;

        let poller = CertificatePoller::new(executor.clone(), options.poller.clone());

        Self {
            orchestrators: OrchestratorFactory::new(executor.clone(), inventory.clone()),
            dns_providers: DnsProviderFactory::new(context),
            scheduler: Arc::new(CertificateScheduler::new(poller)),
            executor,
            inventory,
        }
    }

    pub fn server_state(&self, options: &AppOptions) -> ServerState {
        ServerState::new(
            self.inventory.clone(),
            self.orchestrators.clone(),
            self.dns_providers.clone(),
            self.scheduler.clone(),
            options.webhook_timeout,
        )
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), PlaneError> {
        info!("Shutting down application state...");
        let pending = self.scheduler.len().await;
        if pending > 0 {
            info!("Dropping {} pending certificate checks", pending);
        }
        Ok(())
    }
}
