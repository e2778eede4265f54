//! Deploy-time description of one workload

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Toleration};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvironmentVariable {
    pub key: String,
    pub value: String,

    /// Build-time variables never reach the running container
    #[serde(default)]
    pub is_build_time: bool,
}

/// Container resource limits. `"0"` or blank means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_zero")]
    pub cpus: String,

    #[serde(default = "default_zero")]
    pub memory: String,

    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u32,

    #[serde(default = "default_zero")]
    pub memory_reservation: String,
}

fn default_zero() -> String {
    "0".to_string()
}

fn default_cpu_shares() -> u32 {
    1024
}

fn set(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty() && value != "0").then_some(value)
}

impl ResourceLimits {
    pub fn cpus(&self) -> Option<&str> {
        set(&self.cpus)
    }

    pub fn memory(&self) -> Option<&str> {
        set(&self.memory)
    }

    pub fn memory_reservation(&self) -> Option<&str> {
        set(&self.memory_reservation)
    }

    /// CPU reservation derived from relative shares (1024 shares = 1 CPU)
    pub fn cpu_reservation(&self) -> Option<String> {
        if self.cpu_shares == 0 {
            return None;
        }
        let cpus = self.cpu_shares as f64 / 1024.0;
        Some(format_number(cpus))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: default_zero(),
            memory: default_zero(),
            cpu_shares: default_cpu_shares(),
            memory_reservation: default_zero(),
        }
    }
}

/// Kubernetes specific overrides
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KubernetesOverrides {
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default = "default_service_type")]
    pub service_type: String,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    #[serde(default)]
    pub affinity: Option<Affinity>,

    /// Merged over the generated pod labels; wins on conflict
    #[serde(default)]
    pub pod_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub service_annotations: BTreeMap<String, String>,
}

fn default_replicas() -> u32 {
    1
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

impl Default for KubernetesOverrides {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            service_type: default_service_type(),
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            affinity: None,
            pod_labels: BTreeMap::new(),
            service_annotations: BTreeMap::new(),
        }
    }
}

/// One entry of the comma separated FQDN list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FqdnEntry {
    pub https: bool,
    pub host: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplicationDeploymentSpec {
    pub id: u64,

    /// Stable unique name, used as container, service and deployment name
    pub uuid: String,

    pub name: String,

    #[serde(default)]
    pub server_uuid: String,

    pub image: String,

    /// Comma separated list of exposed container ports
    #[serde(default)]
    pub ports_exposes: String,

    #[serde(default)]
    pub limits: ResourceLimits,

    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,

    /// Swarm placement constraints, e.g. `node.labels.tier==web`
    #[serde(default)]
    pub placement_constraints: Vec<String>,

    #[serde(default = "default_replicas")]
    pub swarm_replicas: u32,

    #[serde(default)]
    pub kubernetes: KubernetesOverrides,

    /// Comma separated URLs, e.g. `https://app.example.com,http://www.example.com`
    #[serde(default)]
    pub fqdn: Option<String>,

    #[serde(default = "default_true")]
    pub is_gzip_enabled: bool,

    #[serde(default)]
    pub is_force_https_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ApplicationDeploymentSpec {
    /// Minimal spec with defaults for everything else
    pub fn new(id: u64, uuid: &str, name: &str, image: &str) -> Self {
        Self {
            id,
            uuid: uuid.to_string(),
            name: name.to_string(),
            server_uuid: String::new(),
            image: image.to_string(),
            ports_exposes: String::new(),
            limits: ResourceLimits::default(),
            environment_variables: Vec::new(),
            placement_constraints: Vec::new(),
            swarm_replicas: default_replicas(),
            kubernetes: KubernetesOverrides::default(),
            fqdn: None,
            is_gzip_enabled: true,
            is_force_https_enabled: false,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.uuid
    }

    pub fn exposed_ports(&self) -> Vec<u16> {
        self.ports_exposes
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect()
    }

    /// First exposed port, 80 when none are set
    pub fn primary_port(&self) -> u16 {
        self.exposed_ports().first().copied().unwrap_or(80)
    }

    /// Runtime environment, build-time variables excluded
    pub fn runtime_env(&self) -> impl Iterator<Item = &EnvironmentVariable> {
        self.environment_variables.iter().filter(|e| !e.is_build_time)
    }

    pub fn fqdn_entries(&self) -> Vec<FqdnEntry> {
        let Some(fqdn) = self.fqdn.as_deref() else {
            return Vec::new();
        };
        crate::utils::split_csv(fqdn)
            .iter()
            .filter_map(|entry| parse_fqdn(entry))
            .collect()
    }

    /// Host names from the FQDN list, deduplicated in order
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = Vec::new();
        for entry in self.fqdn_entries() {
            if !domains.contains(&entry.host) {
                domains.push(entry.host);
            }
        }
        domains
    }
}

fn parse_fqdn(entry: &str) -> Option<FqdnEntry> {
    let with_scheme = if entry.contains("://") {
        entry.to_string()
    } else {
        format!("http://{}", entry)
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?.to_string();
    Some(FqdnEntry {
        https: url.scheme() == "https",
        host,
        path: url.path().to_string(),
    })
}

/// Render a number without a trailing `.0` and at most two decimals
pub fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposed_ports() {
        let mut spec = ApplicationDeploymentSpec::new(1, "u1", "web", "img");
        assert_eq!(spec.primary_port(), 80);
        spec.ports_exposes = "3000, 9090,abc".to_string();
        assert_eq!(spec.exposed_ports(), vec![3000, 9090]);
        assert_eq!(spec.primary_port(), 3000);
    }

    #[test]
    fn test_domains_strip_scheme_and_dedupe() {
        let mut spec = ApplicationDeploymentSpec::new(1, "u1", "web", "img");
        spec.fqdn = Some("https://app.example.com/api, http://app.example.com,www.example.com".to_string());

        assert_eq!(spec.domains(), vec!["app.example.com", "www.example.com"]);
        let entries = spec.fqdn_entries();
        assert!(entries[0].https);
        assert_eq!(entries[0].path, "/api");
        assert!(!entries[2].https);
        assert_eq!(entries[2].path, "/");
    }

    #[test]
    fn test_zero_limits_are_unset() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpus(), None);
        assert_eq!(limits.memory(), None);
        assert_eq!(limits.cpu_reservation().as_deref(), Some("1"));

        let limits = ResourceLimits {
            cpus: "1.5".to_string(),
            memory: "512m".to_string(),
            cpu_shares: 512,
            memory_reservation: "256m".to_string(),
        };
        assert_eq!(limits.cpus(), Some("1.5"));
        assert_eq!(limits.cpu_reservation().as_deref(), Some("0.5"));
    }

    #[test]
    fn test_kubernetes_overrides_parse_typed_tolerations() {
        let overrides: KubernetesOverrides = serde_json::from_value(serde_json::json!({
            "tolerations": [{"key": "gpu", "operator": "Exists", "effect": "NoSchedule"}],
            "node_selector": {"disk": "ssd"}
        }))
        .unwrap();
        assert_eq!(overrides.tolerations[0].key.as_deref(), Some("gpu"));
        assert_eq!(overrides.replicas, 1);
        assert_eq!(overrides.service_type, "ClusterIP");
    }
}
