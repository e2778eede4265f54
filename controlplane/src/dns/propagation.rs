//! TXT lookups against public DNS

use std::collections::HashMap;
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{ResolveError, Resolver, TokioResolver};
use tracing::{debug, trace, warn};

use crate::errors::PlaneError;

#[async_trait]
pub trait TxtResolver: Send + Sync + Debug {
    /// All TXT strings published at `name`. A name with no records yields
    /// an empty list rather than an error.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, PlaneError>;
}

/// Resolver issuing TXT queries from this process via hickory
#[derive(Debug)]
pub struct HickoryTxtResolver {
    resolver: TokioResolver,
}

impl HickoryTxtResolver {
    /// Query `nameservers` directly, or hickory's default public resolvers when empty
    pub fn new(nameservers: &[IpAddr]) -> Self {
        let config = if nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut config = ResolverConfig::new();
            for ip in nameservers {
                config.add_name_server(NameServerConfig::new(SocketAddr::new(*ip, 53), Protocol::Udp));
            }
            config
        };

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        // propagation checks must see fresh answers
        opts.cache_size = 0;

        let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();
        Self { resolver }
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, PlaneError> {
        match self.resolver.txt_lookup(name).await {
            Ok(records) => Ok(records
                .iter()
                .map(|record| {
                    record
                        .txt_data()
                        .iter()
                        .map(|data| String::from_utf8_lossy(data))
                        .collect::<String>()
                })
                .collect()),
            Err(e) if is_empty_answer(&e) => Ok(Vec::new()),
            Err(e) => Err(PlaneError::DnsLookupError(format!("{}: {}", name, e))),
        }
    }
}

/// NXDOMAIN or NOERROR without TXT data: nothing published yet
fn is_empty_answer(e: &ResolveError) -> bool {
    e.is_no_records_found() || e.is_nx_domain()
}

/// In-memory resolver whose answers are set by hand
#[derive(Debug, Default)]
pub struct StaticTxtResolver {
    records: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticTxtResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, name: &str, value: &str) {
        if let Ok(mut records) = self.records.write() {
            records.entry(name.to_string()).or_default().push(value.to_string());
        }
    }

    pub fn clear(&self, name: &str) {
        if let Ok(mut records) = self.records.write() {
            records.remove(name);
        }
    }
}

#[async_trait]
impl TxtResolver for StaticTxtResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, PlaneError> {
        let records = self
            .records
            .read()
            .map_err(|e| PlaneError::Internal(e.to_string()))?;
        Ok(records.get(name).cloned().unwrap_or_default())
    }
}

/// True iff a TXT string at `domain` equals `expected_value` exactly.
/// Resolution errors count as not propagated.
pub async fn verify_txt(resolver: &dyn TxtResolver, domain: &str, expected_value: &str) -> bool {
    match resolver.lookup_txt(domain).await {
        Ok(values) => {
            trace!(record = %domain, found = values.len(), "Checking TXT records");
            let found = values.iter().any(|v| v == expected_value);
            if found {
                debug!(record = %domain, "TXT record propagated");
            }
            found
        }
        Err(e) => {
            warn!(record = %domain, error = %e, "TXT lookup failed");
            false
        }
    }
}
