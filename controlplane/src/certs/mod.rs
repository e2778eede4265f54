//! Certificate provisioning status: what the proxy has issued and a
//! retrying poller that reports the outcome exactly once.

pub mod acme_store;
pub mod fsm;
pub mod poller;

use serde::{Deserialize, Serialize};

use crate::errors::PlaneError;
use crate::models::server::ServerSettings;

pub use acme_store::{domain_matches, AcmeStore};
pub use fsm::{ProvisioningFsm, ProvisioningInput, ProvisioningState};
pub use poller::{CertificatePollTask, CertificatePoller, PollOutcome, PollerConfig};

/// ACME challenge used to issue a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
}

impl CertificateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::Http01 => "http-01",
            CertificateType::Dns01 => "dns-01",
        }
    }

    /// Proxy store file holding certificates issued through this challenge
    pub fn store_file(&self) -> &'static str {
        match self {
            CertificateType::Http01 => "acme.json",
            CertificateType::Dns01 => "acme-dns.json",
        }
    }

    /// Challenge the proxy uses for `domains`: DNS-01 only when every domain
    /// is covered by the server's wildcard domain
    pub fn for_domains(settings: &ServerSettings, domains: &[String]) -> Self {
        let Some(base) = settings
            .wildcard_ssl_domain
            .as_deref()
            .filter(|_| settings.dns_challenge_enabled())
        else {
            return CertificateType::Http01;
        };
        let pattern = format!("*.{}", base.trim().trim_start_matches("*."));
        if !domains.is_empty() && domains.iter().all(|d| domain_matches(&pattern, d)) {
            CertificateType::Dns01
        } else {
            CertificateType::Http01
        }
    }
}

impl std::str::FromStr for CertificateType {
    type Err = PlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http-01" => Ok(CertificateType::Http01),
            "dns-01" => Ok(CertificateType::Dns01),
            other => Err(PlaneError::ValidationError(format!(
                "unknown certificate type: {}",
                other
            ))),
        }
    }
}
