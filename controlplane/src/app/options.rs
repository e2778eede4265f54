//! Application configuration options

use std::net::IpAddr;
use std::time::Duration;

use crate::certs::PollerConfig;
use crate::remote::SshOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{RemoteMode, Settings};
use crate::workers::scheduler;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable the HTTP API
    pub enable_api_server: bool,

    /// Enable the certificate scheduler worker
    pub enable_scheduler: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Scheduler worker options
    pub scheduler: scheduler::Options,

    /// How commands reach managed servers
    pub remote: RemoteOptions,

    /// Certificate poller settings
    pub poller: PollerConfig,

    /// DNS provider settings
    pub dns: DnsOptions,

    /// Timeout for webhook deliveries
    pub webhook_timeout: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_api_server: true,
            enable_scheduler: true,
            server: ServerOptions::default(),
            scheduler: scheduler::Options::default(),
            remote: RemoteOptions::default(),
            poller: PollerConfig::default(),
            dns: DnsOptions::default(),
            webhook_timeout: Duration::from_secs(10),
        }
    }
}

impl AppOptions {
    /// Options from a loaded settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            storage: StorageOptions {
                layout,
                inventory_file: settings.inventory_file.clone(),
            },
            enable_api_server: settings.enable_api_server,
            enable_scheduler: settings.enable_scheduler,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            scheduler: scheduler::Options {
                tick: Duration::from_millis(settings.scheduler.tick_ms.max(1)),
            },
            remote: RemoteOptions {
                mode: settings.remote.mode,
                ssh: SshOptions {
                    key_path: settings.remote.ssh_key_path.clone(),
                    connect_timeout: Duration::from_secs(settings.remote.connect_timeout_secs),
                    command_timeout: Duration::from_secs(settings.remote.command_timeout_secs),
                },
            },
            poller: PollerConfig {
                max_attempts: settings.certificates.max_attempts,
                backoff: Duration::from_secs(settings.certificates.backoff_secs),
                proxy_path: settings.proxy.path.clone(),
            },
            dns: DnsOptions {
                http_timeout: Duration::from_secs(settings.dns.http_timeout_secs),
                nameservers: settings.dns.nameservers.clone(),
            },
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Inventory file name, relative to the layout's base directory
    pub inventory_file: String,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            inventory_file: "inventory.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    pub mode: RemoteMode,
    pub ssh: SshOptions,
}

#[derive(Debug, Clone)]
pub struct DnsOptions {
    /// Timeout for provider API calls
    pub http_timeout: Duration,

    /// Resolvers for propagation checks
    pub nameservers: Vec<IpAddr>,
}

impl Default for DnsOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            nameservers: Vec::new(),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}
