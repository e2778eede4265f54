//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub server: ServerSettings,

    /// Enable the HTTP API
    #[serde(default = "default_true")]
    pub enable_api_server: bool,

    /// Enable the background task scheduler
    #[serde(default = "default_true")]
    pub enable_scheduler: bool,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub certificates: CertificateSettings,

    #[serde(default)]
    pub dns: DnsSettings,

    /// Inventory file name, relative to the storage base directory
    #[serde(default = "default_inventory_file")]
    pub inventory_file: String,
}

fn default_true() -> bool {
    true
}

fn default_inventory_file() -> String {
    "inventory.json".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            server: ServerSettings::default(),
            enable_api_server: true,
            enable_scheduler: true,
            scheduler: SchedulerSettings::default(),
            remote: RemoteSettings::default(),
            proxy: ProxySettings::default(),
            certificates: CertificateSettings::default(),
            dns: DnsSettings::default(),
            inventory_file: default_inventory_file(),
        }
    }
}

/// HTTP API listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// How often due tasks are looked for
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
        }
    }
}

/// How remote commands reach managed servers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteMode {
    #[default]
    Ssh,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub mode: RemoteMode,

    #[serde(default)]
    pub ssh_key_path: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    3600
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            mode: RemoteMode::Ssh,
            ssh_key_path: None,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Proxy data directory on managed servers
    #[serde(default = "default_proxy_path")]
    pub path: String,
}

fn default_proxy_path() -> String {
    "/data/coolify/proxy".to_string()
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            path: default_proxy_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between status checks
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_backoff_secs() -> u64 {
    30
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSettings {
    /// Timeout for DNS provider API calls
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Resolvers used for propagation checks; system defaults when empty
    #[serde(default)]
    pub nameservers: Vec<std::net::IpAddr>,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout(),
            nameservers: Vec::new(),
        }
    }
}
