//! Managed servers and their orchestration settings

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::dns::credentials::DnsCredentials;
use crate::models::application::ApplicationDeploymentSpec;
use crate::remote::RemoteHost;

/// Backend that runs a server's workloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OrchestratorType {
    /// Plain containers managed with docker compose
    #[default]
    None,
    Swarm,
    Kubernetes,
}

impl OrchestratorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorType::None => "none",
            OrchestratorType::Swarm => "swarm",
            OrchestratorType::Kubernetes => "kubernetes",
        }
    }

    /// True for backends that schedule replicas themselves
    pub fn uses_orchestration(&self) -> bool {
        matches!(self, OrchestratorType::Swarm | OrchestratorType::Kubernetes)
    }
}

impl std::str::FromStr for OrchestratorType {
    type Err = String;

    /// Unknown names fall back to standalone
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "swarm" => OrchestratorType::Swarm,
            "kubernetes" => OrchestratorType::Kubernetes,
            _ => OrchestratorType::None,
        })
    }
}

impl serde::Serialize for OrchestratorType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrchestratorType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-server settings. Defaults are applied here, at load time, so call
/// sites never carry their own fallback values.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub orchestrator: OrchestratorType,

    #[serde(default = "default_namespace")]
    pub kubernetes_namespace: String,

    #[serde(default = "default_true")]
    pub kubernetes_use_ingress: bool,

    #[serde(default = "default_ingress_class")]
    pub kubernetes_ingress_class: String,

    #[serde(default = "default_cluster_issuer")]
    pub kubernetes_cluster_issuer: String,

    #[serde(default)]
    pub is_wildcard_ssl_enabled: bool,

    /// Base domain covered by the wildcard certificate, e.g. `example.com`
    #[serde(default)]
    pub wildcard_ssl_domain: Option<String>,

    #[serde(default)]
    pub dns_provider: Option<String>,

    #[serde(default)]
    pub dns_provider_credentials: DnsCredentials,

    #[serde(default)]
    pub acme_email: Option<String>,

    #[serde(default)]
    pub use_staging_acme: bool,

    #[serde(default)]
    pub webhook_enabled: bool,

    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret_opt")]
    pub webhook_secret: Option<SecretString>,

    /// Extra Traefik command line flags appended to the static config
    #[serde(default)]
    pub proxy_custom_commands: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_ingress_class() -> String {
    "nginx".to_string()
}

fn default_cluster_issuer() -> String {
    "letsencrypt-prod".to_string()
}

fn deserialize_secret_opt<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from))
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorType::None,
            kubernetes_namespace: default_namespace(),
            kubernetes_use_ingress: true,
            kubernetes_ingress_class: default_ingress_class(),
            kubernetes_cluster_issuer: default_cluster_issuer(),
            is_wildcard_ssl_enabled: false,
            wildcard_ssl_domain: None,
            dns_provider: None,
            dns_provider_credentials: DnsCredentials::default(),
            acme_email: None,
            use_staging_acme: false,
            webhook_enabled: false,
            webhook_url: None,
            webhook_secret: None,
            proxy_custom_commands: Vec::new(),
        }
    }
}

impl ServerSettings {
    /// DNS-01 is usable when wildcard SSL is on and a provider is chosen
    pub fn dns_challenge_enabled(&self) -> bool {
        self.is_wildcard_ssl_enabled
            && self
                .dns_provider
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty())
    }
}

/// A managed server
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub uuid: String,
    pub name: String,
    pub ip: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub settings: ServerSettings,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

impl Server {
    pub fn remote_host(&self) -> RemoteHost {
        RemoteHost {
            name: self.name.clone(),
            ip: self.ip.clone(),
            user: self.user.clone(),
            port: self.port,
        }
    }
}

/// Ingress settings for a Kubernetes target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressSettings {
    pub class: String,
    pub cluster_issuer: String,
}

/// Where an application runs. Resolved from the server before every
/// operation; a server may switch orchestrators between deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorTarget {
    pub orchestrator: OrchestratorType,
    pub host: RemoteHost,
    pub namespace: Option<String>,
    pub service_type: Option<String>,
    pub ingress: Option<IngressSettings>,
}

impl OrchestratorTarget {
    pub fn resolve(server: &Server, spec: &ApplicationDeploymentSpec) -> Self {
        let settings = &server.settings;
        let is_kubernetes = settings.orchestrator == OrchestratorType::Kubernetes;

        Self {
            orchestrator: settings.orchestrator,
            host: server.remote_host(),
            namespace: is_kubernetes.then(|| settings.kubernetes_namespace.clone()),
            service_type: is_kubernetes.then(|| spec.kubernetes.service_type.clone()),
            ingress: (is_kubernetes && settings.kubernetes_use_ingress).then(|| IngressSettings {
                class: settings.kubernetes_ingress_class.clone(),
                cluster_issuer: settings.kubernetes_cluster_issuer.clone(),
            }),
        }
    }

    /// Kubernetes namespace, `default` when unset
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or("default")
    }
}
