//! Traefik configuration.
//!
//! The static configuration is the proxy's compose file. It declares two
//! ACME resolvers: `letsencrypt` (HTTP-01, `acme.json`) and
//! `letsencrypt-dns` (DNS-01, `acme-dns.json`). The certificate poller reads
//! those same store files.
//!
//! The dynamic configuration is one file per application under
//! `<proxy>/dynamic/`, picked up by Traefik's file provider.

use std::collections::BTreeMap;

use base64::Engine;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::certs::domain_matches;
use crate::errors::PlaneError;
use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::{OrchestratorType, ServerSettings};
use crate::remote::{RemoteExecutor, RemoteHost};

pub const HTTP_RESOLVER: &str = "letsencrypt";
pub const DNS_RESOLVER: &str = "letsencrypt-dns";

const TRAEFIK_IMAGE: &str = "traefik:v3.6";
const STAGING_CA_SERVER: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Environment variables Traefik's DNS challenge reads for `provider`
fn dns_provider_env(settings: &ServerSettings, provider: &str) -> Vec<String> {
    let creds = &settings.dns_provider_credentials;
    let mut env = Vec::new();
    match provider {
        "cloudflare" => {
            if let Some(token) = creds.get("api_token") {
                env.push(format!("CF_API_TOKEN={}", token));
            } else if let (Some(email), Some(key)) = (creds.get("email"), creds.get("api_key")) {
                env.push(format!("CF_API_EMAIL={}", email));
                env.push(format!("CF_API_KEY={}", key));
            }
        }
        "route53" => {
            if let (Some(id), Some(secret)) = (creds.get("access_key_id"), creds.get("secret_access_key")) {
                env.push(format!("AWS_ACCESS_KEY_ID={}", id));
                env.push(format!("AWS_SECRET_ACCESS_KEY={}", secret));
                if let Some(region) = creds.get("region") {
                    env.push(format!("AWS_REGION={}", region));
                }
            }
        }
        "digitalocean" => {
            if let Some(token) = creds.get("auth_token") {
                env.push(format!("DO_AUTH_TOKEN={}", token));
            }
        }
        _ => {}
    }
    env
}

/// Proxy compose file for a server
pub fn static_config(settings: &ServerSettings, proxy_path: &str) -> Result<String, PlaneError> {
    let is_swarm = settings.orchestrator == OrchestratorType::Swarm;
    let network = if is_swarm { "coolify-overlay" } else { "coolify" };

    let labels = vec![
        "traefik.enable=true",
        "traefik.http.routers.traefik.entrypoints=http",
        "traefik.http.routers.traefik.service=api@internal",
        "traefik.http.services.traefik.loadbalancer.server.port=8080",
        "keel.managed=true",
        "keel.proxy=true",
    ];

    let mut command: Vec<String> = [
        "--ping=true",
        "--ping.entrypoint=http",
        "--api.dashboard=true",
        "--api.insecure=false",
        "--entrypoints.http.address=:80",
        "--entrypoints.https.address=:443",
        "--entrypoints.http.http.encodequerysemicolons=true",
        "--entryPoints.http.http2.maxConcurrentStreams=250",
        "--entrypoints.https.http.encodequerysemicolons=true",
        "--entryPoints.https.http2.maxConcurrentStreams=250",
        "--entrypoints.https.http3",
        "--providers.file.directory=/traefik/dynamic/",
        "--providers.file.watch=true",
        "--certificatesresolvers.letsencrypt.acme.httpchallenge=true",
        "--certificatesresolvers.letsencrypt.acme.httpchallenge.entrypoint=http",
        "--certificatesresolvers.letsencrypt.acme.storage=/traefik/acme.json",
        "--certificatesresolvers.letsencrypt-dns.acme.dnschallenge=true",
        "--certificatesresolvers.letsencrypt-dns.acme.storage=/traefik/acme-dns.json",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();

    if is_swarm {
        command.push("--providers.swarm.endpoint=unix:///var/run/docker.sock".to_string());
        command.push("--providers.swarm.exposedbydefault=false".to_string());
    } else {
        command.push("--providers.docker=true".to_string());
        command.push("--providers.docker.exposedbydefault=false".to_string());
    }

    let mut environment = Vec::new();
    if let Some(provider) = settings
        .dns_provider
        .as_deref()
        .filter(|_| settings.dns_challenge_enabled())
    {
        let provider = provider.trim().to_lowercase();
        command.push(format!(
            "--certificatesresolvers.letsencrypt-dns.acme.dnschallenge.provider={}",
            provider
        ));
        if let Some(email) = settings.acme_email.as_deref().filter(|e| !e.trim().is_empty()) {
            command.push(format!("--certificatesresolvers.letsencrypt-dns.acme.email={}", email));
            command.push(format!("--certificatesresolvers.letsencrypt.acme.email={}", email));
        }
        if settings.use_staging_acme {
            command.push(format!(
                "--certificatesresolvers.letsencrypt-dns.acme.caserver={}",
                STAGING_CA_SERVER
            ));
        }
        environment = dns_provider_env(settings, &provider);
    }
    command.extend(settings.proxy_custom_commands.iter().cloned());

    let mut traefik = json!({
        "image": TRAEFIK_IMAGE,
        "extra_hosts": ["host.docker.internal:host-gateway"],
        "networks": [network],
        "ports": ["80:80", "443:443", "443:443/udp", "8080:8080"],
        "healthcheck": {
            "test": "wget -qO- http://localhost:80/ping || exit 1",
            "interval": "4s",
            "timeout": "2s",
            "retries": 5
        },
        "volumes": [
            "/var/run/docker.sock:/var/run/docker.sock:ro",
            format!("{}:/traefik", proxy_path.trim_end_matches('/'))
        ],
        "command": command,
    });

    if is_swarm {
        traefik["deploy"] = json!({
            "labels": labels,
            "placement": {"constraints": ["node.role==manager"]}
        });
    } else {
        traefik["container_name"] = json!("coolify-proxy");
        traefik["restart"] = json!("unless-stopped");
        traefik["labels"] = json!(labels);
    }
    if !environment.is_empty() {
        traefik["environment"] = json!(environment);
    }

    let config = json!({
        "name": "coolify-proxy",
        "networks": {network: {"external": true}},
        "services": {"traefik": traefik},
    });
    Ok(serde_yaml::to_string(&config)?)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicConfig {
    pub http: HttpSection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpSection {
    pub routers: BTreeMap<String, Router>,
    pub services: BTreeMap<String, LoadBalancedService>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub middlewares: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Router {
    pub rule: String,
    pub service: String,
    #[serde(rename = "entryPoints")]
    pub entry_points: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouterTls>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterTls {
    #[serde(rename = "certResolver")]
    pub cert_resolver: String,
    /// Wildcard request for DNS-01 routers
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<TlsDomain>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlsDomain {
    pub main: String,
    pub sans: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancedService {
    #[serde(rename = "loadBalancer")]
    pub load_balancer: LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancer {
    pub servers: Vec<BTreeMap<String, String>>,
}

/// Wildcard base domain covering `host`, when wildcard SSL is usable
fn wildcard_base<'a>(settings: &'a ServerSettings, host: &str) -> Option<&'a str> {
    if !settings.dns_challenge_enabled() {
        return None;
    }
    let base = settings.wildcard_ssl_domain.as_deref()?.trim().trim_start_matches("*.");
    domain_matches(&format!("*.{}", base), host).then_some(base)
}

/// Routers and service for an application, `None` without domains
pub fn dynamic_config(app: &ApplicationDeploymentSpec, settings: &ServerSettings) -> Option<DynamicConfig> {
    let entries = app.fqdn_entries();
    if entries.is_empty() {
        return None;
    }

    let uuid = app.identifier();
    let service_name = format!("app-{}", uuid);
    let gzip = format!("gzip-{}", uuid);

    let mut middlewares = BTreeMap::new();
    if app.is_gzip_enabled {
        middlewares.insert(gzip.clone(), json!({"compress": true}));
    }

    let mut routers = BTreeMap::new();
    let mut redirects = false;
    for (index, entry) in entries.iter().enumerate() {
        let path = if entry.path.is_empty() { "/" } else { entry.path.as_str() };
        let router = Router {
            rule: format!("Host(`{}`) && PathPrefix(`{}`)", entry.host, path),
            service: service_name.clone(),
            entry_points: vec!["http".to_string()],
            middlewares: if app.is_gzip_enabled { vec![gzip.clone()] } else { Vec::new() },
            tls: None,
        };

        if entry.https {
            let tls = match wildcard_base(settings, &entry.host) {
                Some(base) => RouterTls {
                    cert_resolver: DNS_RESOLVER.to_string(),
                    domains: vec![TlsDomain {
                        main: base.to_string(),
                        sans: vec![format!("*.{}", base)],
                    }],
                },
                None => RouterTls {
                    cert_resolver: HTTP_RESOLVER.to_string(),
                    domains: Vec::new(),
                },
            };
            routers.insert(
                format!("https-{}-{}", index, uuid),
                Router {
                    entry_points: vec!["https".to_string()],
                    tls: Some(tls),
                    ..router.clone()
                },
            );
        }

        let mut router = router;
        if entry.https && app.is_force_https_enabled {
            router.middlewares.push("redirect-to-https".to_string());
            redirects = true;
        }
        routers.insert(format!("http-{}-{}", index, uuid), router);
    }
    if redirects {
        middlewares.insert(
            "redirect-to-https".to_string(),
            json!({"redirectScheme": {"scheme": "https", "permanent": true}}),
        );
    }

    let server = BTreeMap::from([(
        "url".to_string(),
        format!("http://{}:{}", uuid, app.primary_port()),
    )]);
    let services = BTreeMap::from([(
        service_name,
        LoadBalancedService {
            load_balancer: LoadBalancer { servers: vec![server] },
        },
    )]);

    Some(DynamicConfig {
        http: HttpSection {
            routers,
            services,
            middlewares,
        },
    })
}

/// Dynamic config file path for an application
pub fn dynamic_config_path(proxy_path: &str, app: &ApplicationDeploymentSpec) -> String {
    format!(
        "{}/dynamic/app-{}.yaml",
        proxy_path.trim_end_matches('/'),
        app.identifier()
    )
}

/// Write the application's dynamic config to the server, or remove it when
/// the application has no domains
pub async fn write_dynamic_config(
    executor: &dyn RemoteExecutor,
    host: &RemoteHost,
    proxy_path: &str,
    app: &ApplicationDeploymentSpec,
    settings: &ServerSettings,
) -> Result<(), PlaneError> {
    let Some(config) = dynamic_config(app, settings) else {
        return remove_dynamic_config(executor, host, proxy_path, app).await;
    };

    let yaml = format!(
        "# Generated by keel for application: {}\n# UUID: {}\n# Last updated: {}\n\n{}",
        app.name,
        app.identifier(),
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        serde_yaml::to_string(&config)?
    );
    let encoded = base64::engine::general_purpose::STANDARD.encode(yaml);
    let path = dynamic_config_path(proxy_path, app);

    executor
        .run(
            host,
            &[
                format!("mkdir -p {}/dynamic", proxy_path.trim_end_matches('/')),
                format!("echo '{}' | base64 -d > {}", encoded, path),
                format!("chmod 644 {}", path),
            ],
            false,
        )
        .await?;
    info!(application = %app.identifier(), routers = config.http.routers.len(), "Wrote proxy configuration");
    Ok(())
}

pub async fn remove_dynamic_config(
    executor: &dyn RemoteExecutor,
    host: &RemoteHost,
    proxy_path: &str,
    app: &ApplicationDeploymentSpec,
) -> Result<(), PlaneError> {
    let path = dynamic_config_path(proxy_path, app);
    executor.run(host, &[format!("rm -f {}", path)], false).await?;
    debug!(application = %app.identifier(), "Removed proxy configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::DnsCredentials;
    use crate::remote::RecordingExecutor;

    fn wildcard_settings() -> ServerSettings {
        ServerSettings {
            is_wildcard_ssl_enabled: true,
            wildcard_ssl_domain: Some("example.com".to_string()),
            dns_provider: Some("cloudflare".to_string()),
            dns_provider_credentials: DnsCredentials::new().with("api_token", "cf-token"),
            acme_email: Some("ops@example.com".to_string()),
            use_staging_acme: true,
            proxy_custom_commands: vec!["--entrypoints.https.forwardedHeaders.insecure=true".to_string()],
            ..ServerSettings::default()
        }
    }

    fn app() -> ApplicationDeploymentSpec {
        let mut app = ApplicationDeploymentSpec::new(3, "u1", "shop", "shop:1");
        app.ports_exposes = "3000".to_string();
        app.fqdn = Some("https://shop.example.com,https://shop.other.org/api".to_string());
        app.is_force_https_enabled = true;
        app
    }

    #[test]
    fn test_static_config_with_dns_challenge() {
        let yaml = static_config(&wildcard_settings(), "/data/coolify/proxy/").unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let traefik = &doc["services"]["traefik"];

        assert_eq!(traefik["image"].as_str(), Some("traefik:v3.6"));
        let command: Vec<&str> = traefik["command"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(|c| c.as_str())
            .collect();
        assert!(command.contains(&"--certificatesresolvers.letsencrypt-dns.acme.dnschallenge.provider=cloudflare"));
        assert!(command.contains(&"--providers.docker=true"));
        assert!(command
            .iter()
            .any(|c| c.ends_with("caserver=https://acme-staging-v02.api.letsencrypt.org/directory")));
        assert_eq!(command.last(), Some(&"--entrypoints.https.forwardedHeaders.insecure=true"));
        assert_eq!(traefik["environment"][0].as_str(), Some("CF_API_TOKEN=cf-token"));
        assert_eq!(traefik["volumes"][1].as_str(), Some("/data/coolify/proxy:/traefik"));
        assert_eq!(traefik["container_name"].as_str(), Some("coolify-proxy"));
    }

    #[test]
    fn test_static_config_for_swarm_without_wildcard() {
        let settings = ServerSettings {
            orchestrator: OrchestratorType::Swarm,
            dns_provider: Some("route53".to_string()),
            ..ServerSettings::default()
        };
        let yaml = static_config(&settings, "/data/coolify/proxy").unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let traefik = &doc["services"]["traefik"];

        assert!(traefik.get("container_name").is_none());
        assert!(traefik.get("environment").is_none());
        assert_eq!(
            traefik["deploy"]["placement"]["constraints"][0].as_str(),
            Some("node.role==manager")
        );
        assert!(doc["networks"].get("coolify-overlay").is_some());
        assert!(!yaml.contains("dnschallenge.provider"));
    }

    #[test]
    fn test_dynamic_config_picks_resolver_per_host() {
        let config = dynamic_config(&app(), &wildcard_settings()).unwrap();
        let routers = &config.http.routers;

        let wildcard = routers["https-0-u1"].tls.as_ref().unwrap();
        assert_eq!(wildcard.cert_resolver, DNS_RESOLVER);
        assert_eq!(wildcard.domains[0].sans, vec!["*.example.com"]);

        let other = routers["https-1-u1"].tls.as_ref().unwrap();
        assert_eq!(other.cert_resolver, HTTP_RESOLVER);
        assert_eq!(routers["https-1-u1"].rule, "Host(`shop.other.org`) && PathPrefix(`/api`)");

        assert_eq!(routers["http-0-u1"].middlewares, vec!["gzip-u1", "redirect-to-https"]);
        assert!(config.http.middlewares.contains_key("redirect-to-https"));
        assert_eq!(
            config.http.services["app-u1"].load_balancer.servers[0]["url"],
            "http://u1:3000"
        );
    }

    #[test]
    fn test_no_dynamic_config_without_domains() {
        let mut app = app();
        app.fqdn = None;
        assert!(dynamic_config(&app, &ServerSettings::default()).is_none());
    }

    #[tokio::test]
    async fn test_write_and_remove() {
        let executor = RecordingExecutor::new();
        let host = RemoteHost::new("srv", "10.0.0.1");

        write_dynamic_config(&executor, &host, "/data/coolify/proxy", &app(), &ServerSettings::default())
            .await
            .unwrap();
        let calls = executor.calls();
        assert_eq!(calls[0], "mkdir -p /data/coolify/proxy/dynamic");
        assert!(calls[1].ends_with("| base64 -d > /data/coolify/proxy/dynamic/app-u1.yaml"));

        let mut without_domains = app();
        without_domains.fqdn = Some(" ".to_string());
        write_dynamic_config(&executor, &host, "/data/coolify/proxy", &without_domains, &ServerSettings::default())
            .await
            .unwrap();
        assert_eq!(
            executor.calls().last().map(String::as_str),
            Some("rm -f /data/coolify/proxy/dynamic/app-u1.yaml")
        );
    }
}
