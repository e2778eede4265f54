//! Cloudflare DNS client (API v4)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::dns::propagation::{verify_txt, TxtResolver};
use crate::dns::{extract_root_domain, query, DnsCredentials, DnsProvider, ProviderContext, RECORD_TTL};
use crate::errors::PlaneError;
use crate::http::client::{Auth, RestClient};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
/// Only accepts API tokens
const TOKEN_VERIFY_PATH: &str = "/user/tokens/verify";
/// Accepts the global key pair
const USER_PATH: &str = "/user";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug)]
pub struct CloudflareProvider {
    client: RestClient,
    /// Lightweight authenticated endpoint for the configured auth mode
    verify_path: &'static str,
    resolver: Arc<dyn TxtResolver>,
    /// Explicit zone id from credentials, skips the zone lookup
    zone_id: Option<String>,
    zones: Mutex<HashMap<String, String>>,
}

impl CloudflareProvider {
    /// An `api_token` is preferred. `email` plus `api_key` (global key) is
    /// accepted as a fallback.
    pub fn new(credentials: &DnsCredentials, context: &ProviderContext) -> Result<Self, PlaneError> {
        let (auth, verify_path) = if let Some(token) = credentials.secret("api_token") {
            (Auth::Bearer(token), TOKEN_VERIFY_PATH)
        } else if let (Some(email), Some(key)) =
            (credentials.secret("email"), credentials.secret("api_key"))
        {
            let headers = vec![
                ("X-Auth-Email".to_string(), email),
                ("X-Auth-Key".to_string(), key),
            ];
            (Auth::Headers(headers), USER_PATH)
        } else {
            return Err(PlaneError::MissingCredential {
                provider: "cloudflare".to_string(),
                field: "api_token".to_string(),
            });
        };

        let client = RestClient::new(context.base_url_or(API_BASE), context.http_timeout, auth)?;

        Ok(Self {
            client,
            verify_path,
            resolver: context.resolver.clone(),
            zone_id: credentials.get("zone_id").map(str::to_string),
            zones: Mutex::new(HashMap::new()),
        })
    }

    async fn zone_id(&self, domain: &str) -> Result<String, PlaneError> {
        if let Some(zone_id) = &self.zone_id {
            return Ok(zone_id.clone());
        }

        let root = extract_root_domain(domain);
        if let Some(cached) = self.cached_zone(&root) {
            return Ok(cached);
        }

        let path = format!("/zones?{}", query(&[("name", &root)]));
        let envelope: Envelope<Vec<Zone>> = self.client.get(&path).await?;
        let zone = envelope
            .result
            .and_then(|zones| zones.into_iter().next())
            .ok_or_else(|| PlaneError::NotFound(format!("Cloudflare zone for {}", root)))?;

        if let Ok(mut zones) = self.zones.lock() {
            zones.insert(root, zone.id.clone());
        }
        Ok(zone.id)
    }

    fn cached_zone(&self, root: &str) -> Option<String> {
        self.zones.lock().ok().and_then(|z| z.get(root).cloned())
    }

    async fn find_record(&self, zone_id: &str, domain: &str, value: &str) -> Result<Option<String>, PlaneError> {
        let path = format!(
            "/zones/{}/dns_records?{}",
            zone_id,
            query(&[("type", "TXT"), ("name", domain)])
        );
        let envelope: Envelope<Vec<Record>> = self.client.get(&path).await?;

        Ok(envelope
            .result
            .unwrap_or_default()
            .into_iter()
            .find(|r| r.content.trim_matches('"') == value)
            .map(|r| r.id))
    }

    async fn try_create(&self, domain: &str, value: &str) -> Result<bool, PlaneError> {
        let zone_id = self.zone_id(domain).await?;
        if self.find_record(&zone_id, domain, value).await?.is_some() {
            info!("Cloudflare: TXT record for {} already present", domain);
            return Ok(true);
        }

        let body = json!({
            "type": "TXT",
            "name": domain,
            "content": value,
            "ttl": RECORD_TTL,
        });
        let response = self
            .client
            .send(Method::POST, &format!("/zones/{}/dns_records", zone_id), Some(&body))
            .await?;

        if !response.is_success() {
            warn!("Cloudflare API error: {} - {}", response.status, response.body);
            return Ok(false);
        }
        let envelope: Envelope<serde_json::Value> = response.json()?;
        if envelope.success {
            info!("Cloudflare: created TXT record for {}", domain);
        }
        Ok(envelope.success)
    }

    async fn try_delete(&self, domain: &str, value: &str) -> Result<bool, PlaneError> {
        let zone_id = self.zone_id(domain).await?;
        let Some(record_id) = self.find_record(&zone_id, domain, value).await? else {
            info!("Cloudflare: no TXT record for {}, nothing to delete", domain);
            return Ok(true);
        };

        let response = self
            .client
            .send(
                Method::DELETE,
                &format!("/zones/{}/dns_records/{}", zone_id, record_id),
                None,
            )
            .await?;
        if !response.is_success() {
            warn!("Cloudflare API error: {} - {}", response.status, response.body);
            return Ok(false);
        }
        info!("Cloudflare: deleted TXT record for {}", domain);
        Ok(true)
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }

    async fn create_txt_record(&self, domain: &str, value: &str) -> bool {
        self.try_create(domain, value).await.unwrap_or_else(|e| {
            warn!("Cloudflare create_txt_record failed for {}: {}", domain, e);
            false
        })
    }

    async fn delete_txt_record(&self, domain: &str, value: &str) -> bool {
        self.try_delete(domain, value).await.unwrap_or_else(|e| {
            warn!("Cloudflare delete_txt_record failed for {}: {}", domain, e);
            false
        })
    }

    async fn verify_dns_propagation(&self, domain: &str, expected_value: &str) -> bool {
        verify_txt(&*self.resolver, domain, expected_value).await
    }

    async fn validate_credentials(&self) -> bool {
        match self.client.send(Method::GET, self.verify_path, None).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                warn!("Cloudflare credential validation failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::propagation::StaticTxtResolver;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(server: &MockServer) -> ProviderContext {
        ProviderContext::new(Arc::new(StaticTxtResolver::new())).with_base_url(&server.uri())
    }

    async fn mount_zone(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/zones"))
            .and(query_param("name", "example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": [{"id": "zone-1"}]
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_requires_credentials() {
        let ctx = ProviderContext::new(Arc::new(StaticTxtResolver::new()));
        let err = CloudflareProvider::new(&DnsCredentials::new(), &ctx).unwrap_err();
        assert!(err.is_configuration());

        let creds = DnsCredentials::new().with("email", "a@b.c").with("api_key", "k");
        assert!(CloudflareProvider::new(&creds, &ctx).is_ok());
        assert_eq!(
            CloudflareProvider::new(&creds, &ctx).unwrap().provider_name(),
            "cloudflare"
        );
    }

    #[tokio::test]
    async fn test_create_posts_record_with_ttl() {
        let server = MockServer::start().await;
        mount_zone(&server).await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "result": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({
                "type": "TXT",
                "name": "_acme-challenge.example.com",
                "content": "abc",
                "ttl": 120
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "result": {"id": "rec-1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let creds = DnsCredentials::new().with("api_token", "tok");
        let provider = CloudflareProvider::new(&creds, &context(&server)).unwrap();
        assert!(provider.create_txt_record("_acme-challenge.example.com", "abc").await);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-9/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": [{"id": "rec-1", "content": "\"abc\""}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let creds = DnsCredentials::new()
            .with("api_token", "tok")
            .with("zone_id", "zone-9");
        let provider = CloudflareProvider::new(&creds, &context(&server)).unwrap();
        assert!(provider.create_txt_record("_acme-challenge.example.com", "abc").await);
    }

    #[tokio::test]
    async fn test_delete_twice_succeeds() {
        let server = MockServer::start().await;
        mount_zone(&server).await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result": [{"id": "rec-1", "content": "abc"}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "result": []
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/zones/zone-1/dns_records/rec-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let creds = DnsCredentials::new().with("api_token", "tok");
        let provider = CloudflareProvider::new(&creds, &context(&server)).unwrap();
        assert!(provider.delete_txt_record("_acme-challenge.example.com", "abc").await);
        assert!(provider.delete_txt_record("_acme-challenge.example.com", "abc").await);
    }

    #[tokio::test]
    async fn test_api_failure_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let creds = DnsCredentials::new().with("api_token", "tok");
        let provider = CloudflareProvider::new(&creds, &context(&server)).unwrap();
        assert!(!provider.create_txt_record("_acme-challenge.example.com", "abc").await);
        assert!(!provider.validate_credentials().await);
    }

    #[tokio::test]
    async fn test_validate_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user/tokens/verify"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let creds = DnsCredentials::new().with("api_token", "tok");
        let provider = CloudflareProvider::new(&creds, &context(&server)).unwrap();
        assert!(provider.validate_credentials().await);
    }

    #[tokio::test]
    async fn test_validate_global_key_uses_user_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("x-auth-email", "a@b.c"))
            .and(header("x-auth-key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/tokens/verify"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"success": false})))
            .expect(0)
            .mount(&server)
            .await;

        let creds = DnsCredentials::new().with("email", "a@b.c").with("api_key", "k");
        let provider = CloudflareProvider::new(&creds, &context(&server)).unwrap();
        assert!(provider.validate_credentials().await);
    }
}
