//! DNS-01 support: provider clients, propagation checks and the TXT record
//! lifecycle used to prove domain control.

pub mod challenge;
pub mod cloudflare;
pub mod credentials;
pub mod digitalocean;
pub mod factory;
pub mod propagation;
pub mod route53;
pub mod sigv4;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::dns::propagation::TxtResolver;

pub use credentials::DnsCredentials;
pub use factory::{CredentialValidation, DnsProviderFactory};

/// Challenge record label
pub const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge";

/// TTL used for every challenge record
pub const RECORD_TTL: u32 = 120;

/// Capability set shared by every DNS provider client.
///
/// Record operations fail closed: any HTTP or API error is logged and
/// reported as `false`. Only construction can return an error, and only for
/// missing configuration.
#[async_trait]
pub trait DnsProvider: Send + Sync + Debug {
    /// Lowercase provider identifier as accepted by the factory, e.g. `cloudflare`
    fn provider_name(&self) -> &'static str;

    /// Publish a TXT record. Publishing an existing `(domain, value)` pair
    /// again must not create a second record.
    async fn create_txt_record(&self, domain: &str, value: &str) -> bool;

    /// Remove the TXT record matching `(domain, value)`. A record that is
    /// already gone counts as removed.
    async fn delete_txt_record(&self, domain: &str, value: &str) -> bool;

    /// Query public DNS, not the provider API, for `expected_value`
    async fn verify_dns_propagation(&self, domain: &str, expected_value: &str) -> bool;

    /// One lightweight authenticated call without side effects
    async fn validate_credentials(&self) -> bool;
}

/// Shared construction parameters for provider clients
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub http_timeout: Duration,
    pub resolver: Arc<dyn TxtResolver>,
    /// Base URL override, used to point clients at a local API
    pub base_url: Option<String>,
}

impl ProviderContext {
    pub fn new(resolver: Arc<dyn TxtResolver>) -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            resolver,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default)
    }
}

/// Last two dot separated labels: `a.b.example.com` -> `example.com`
pub fn extract_root_domain(fqdn: &str) -> String {
    let labels: Vec<&str> = fqdn
        .trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    labels[labels.len() - 2..].join(".")
}

/// Record name relative to `base_domain`; `@` for the apex
pub fn extract_subdomain(full_domain: &str, base_domain: &str) -> String {
    if full_domain == base_domain {
        return "@".to_string();
    }
    full_domain
        .strip_suffix(&format!(".{}", base_domain))
        .unwrap_or(full_domain)
        .to_string()
}

/// `*.example.com` and `example.com` both map to `_acme-challenge.example.com`
pub fn challenge_record_fqdn(domain: &str) -> String {
    let normalized = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}", ACME_CHALLENGE_PREFIX, normalized)
}

/// Build a query string with percent encoding
pub(crate) fn query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_root_domain() {
        assert_eq!(extract_root_domain("a.b.example.com"), "example.com");
        assert_eq!(extract_root_domain("_acme-challenge.example.com"), "example.com");
        assert_eq!(extract_root_domain("example.com"), "example.com");
        assert_eq!(extract_root_domain("example.com."), "example.com");
    }

    #[test]
    fn test_extract_subdomain() {
        assert_eq!(extract_subdomain("example.com", "example.com"), "@");
        assert_eq!(
            extract_subdomain("_acme-challenge.example.com", "example.com"),
            "_acme-challenge"
        );
        assert_eq!(
            extract_subdomain("_acme-challenge.app.example.com", "example.com"),
            "_acme-challenge.app"
        );
    }

    #[test]
    fn test_challenge_record_fqdn() {
        assert_eq!(challenge_record_fqdn("*.example.com"), "_acme-challenge.example.com");
        assert_eq!(challenge_record_fqdn("app.example.com"), "_acme-challenge.app.example.com");
    }

    #[test]
    fn test_query_is_encoded() {
        assert_eq!(query(&[("type", "TXT"), ("name", "a b")]), "type=TXT&name=a+b");
    }
}
