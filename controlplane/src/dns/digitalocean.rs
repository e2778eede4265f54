//! DigitalOcean DNS client (API v2)

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::dns::propagation::{verify_txt, TxtResolver};
use crate::dns::{
    extract_root_domain, extract_subdomain, query, DnsCredentials, DnsProvider, ProviderContext,
    RECORD_TTL,
};
use crate::errors::PlaneError;
use crate::http::client::{Auth, RestClient};

const API_BASE: &str = "https://api.digitalocean.com";

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    domain_records: Vec<DomainRecord>,
}

#[derive(Debug, Deserialize)]
struct DomainRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug)]
pub struct DigitalOceanProvider {
    client: RestClient,
    resolver: Arc<dyn TxtResolver>,
    /// Domain registered with DigitalOcean, when it is not the last two labels
    domain: Option<String>,
}

impl DigitalOceanProvider {
    pub fn new(credentials: &DnsCredentials, context: &ProviderContext) -> Result<Self, PlaneError> {
        let token = credentials.require("digitalocean", "auth_token")?;

        Ok(Self {
            client: RestClient::new(
                context.base_url_or(API_BASE),
                context.http_timeout,
                Auth::Bearer(token),
            )?,
            resolver: context.resolver.clone(),
            domain: credentials
                .get("domain")
                .map(|d| extract_root_domain(d.trim_start_matches("*."))),
        })
    }

    fn base_domain(&self, fqdn: &str) -> String {
        self.domain
            .clone()
            .unwrap_or_else(|| extract_root_domain(fqdn))
    }

    async fn find_record(&self, base: &str, fqdn: &str, value: &str) -> Result<Option<u64>, PlaneError> {
        let name = extract_subdomain(fqdn, base);
        let path = format!(
            "/v2/domains/{}/records?{}",
            base,
            query(&[("type", "TXT"), ("name", fqdn)])
        );
        let list: RecordList = self.client.get(&path).await?;

        Ok(list
            .domain_records
            .into_iter()
            .find(|r| r.data == value && r.name == name)
            .map(|r| r.id))
    }

    async fn try_create(&self, fqdn: &str, value: &str) -> Result<bool, PlaneError> {
        let base = self.base_domain(fqdn);
        if self.find_record(&base, fqdn, value).await?.is_some() {
            info!("DigitalOcean: TXT record for {} already present", fqdn);
            return Ok(true);
        }

        let body = json!({
            "type": "TXT",
            "name": extract_subdomain(fqdn, &base),
            "data": value,
            "ttl": RECORD_TTL,
        });
        let response = self
            .client
            .send(Method::POST, &format!("/v2/domains/{}/records", base), Some(&body))
            .await?;

        if response.is_success() {
            info!("DigitalOcean: created TXT record for {}", fqdn);
            return Ok(true);
        }
        let message = response
            .json::<serde_json::Value>()
            .ok()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!("DigitalOcean API error: {}", message);
        Ok(false)
    }

    async fn try_delete(&self, fqdn: &str, value: &str) -> Result<bool, PlaneError> {
        let base = self.base_domain(fqdn);
        let Some(record_id) = self.find_record(&base, fqdn, value).await? else {
            info!("DigitalOcean: no TXT record for {}, nothing to delete", fqdn);
            return Ok(true);
        };

        let response = self
            .client
            .send(
                Method::DELETE,
                &format!("/v2/domains/{}/records/{}", base, record_id),
                None,
            )
            .await?;
        if response.is_success() || response.status == StatusCode::NOT_FOUND {
            info!("DigitalOcean: deleted TXT record for {}", fqdn);
            return Ok(true);
        }
        warn!("DigitalOcean API error: {} - {}", response.status, response.body);
        Ok(false)
    }
}

#[async_trait]
impl DnsProvider for DigitalOceanProvider {
    fn provider_name(&self) -> &'static str {
        "digitalocean"
    }

    async fn create_txt_record(&self, domain: &str, value: &str) -> bool {
        self.try_create(domain, value).await.unwrap_or_else(|e| {
            warn!("DigitalOcean create_txt_record failed for {}: {}", domain, e);
            false
        })
    }

    async fn delete_txt_record(&self, domain: &str, value: &str) -> bool {
        self.try_delete(domain, value).await.unwrap_or_else(|e| {
            warn!("DigitalOcean delete_txt_record failed for {}: {}", domain, e);
            false
        })
    }

    async fn verify_dns_propagation(&self, domain: &str, expected_value: &str) -> bool {
        verify_txt(&*self.resolver, domain, expected_value).await
    }

    async fn validate_credentials(&self) -> bool {
        match self.client.send(Method::GET, "/v2/account", None).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                warn!("DigitalOcean credential validation failed: {}", e);
                false
            }
        }
    }
}
