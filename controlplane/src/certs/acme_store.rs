//! Read-only view of the proxy's ACME store.
//!
//! The store is a JSON object keyed by resolver name. Each resolver may hold
//! a `Certificates` array whose entries carry `domain.main` and
//! `domain.sans`. The proxy rewrites the file while we read it, so anything
//! that does not parse is treated as "nothing issued yet".

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
struct CertificateDomain {
    #[serde(default)]
    main: Option<String>,
    /// The proxy writes `null` for certificates without SANs
    #[serde(default)]
    sans: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct StoredCertificate {
    #[serde(default)]
    domain: Option<CertificateDomain>,
}

/// Certificate domains found in one store file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcmeStore {
    names: Vec<String>,
}

impl AcmeStore {
    /// Parse store content. Returns `None` when the content is empty or not
    /// a JSON object. Malformed resolvers and certificates are skipped.
    pub fn parse(content: &str) -> Option<Self> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }
        let Value::Object(resolvers) = serde_json::from_str::<Value>(content).ok()? else {
            return None;
        };

        let mut names = Vec::new();
        for resolver in resolvers.values() {
            let Some(certificates) = resolver.get("Certificates").and_then(Value::as_array) else {
                continue;
            };
            for certificate in certificates {
                let Ok(StoredCertificate { domain: Some(domain) }) = StoredCertificate::deserialize(certificate) else {
                    continue;
                };
                names.extend(domain.main);
                names.extend(domain.sans.into_iter().flatten());
            }
        }
        Some(Self { names })
    }

    /// Whether any stored certificate covers `domain`
    pub fn covers(&self, domain: &str) -> bool {
        self.names.iter().any(|name| domain_matches(name, domain))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Exact match, or a `*.base` pattern whose base equals everything after
/// the first label of `domain`. A wildcard never covers its own base.
pub fn domain_matches(pattern: &str, domain: &str) -> bool {
    if pattern == domain {
        return true;
    }
    let Some(base) = pattern.strip_prefix("*.") else {
        return false;
    };
    match domain.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest == base,
        None => false,
    }
}
