//! TXT record lifecycle for one DNS-01 challenge: publish, wait for
//! propagation, let the caller validate, then clean up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::dns::{challenge_record_fqdn, DnsProvider};
use crate::errors::PlaneError;

#[derive(Debug, Clone)]
pub struct ChallengeConfig {
    /// Pause after publishing before the first lookup
    pub initial_delay: Duration,
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            check_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

/// A record this challenge created and still owns
#[must_use = "a published record must be passed to TxtChallenge::cleanup"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub fqdn: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct TxtChallenge {
    provider: Arc<dyn DnsProvider>,
    config: ChallengeConfig,
}

impl TxtChallenge {
    pub fn new(provider: Arc<dyn DnsProvider>, config: ChallengeConfig) -> Self {
        Self { provider, config }
    }

    /// Create `_acme-challenge.<domain>` with `value`
    pub async fn publish(&self, domain: &str, value: &str) -> Result<PublishedRecord, PlaneError> {
        let fqdn = challenge_record_fqdn(domain);
        if !self.provider.create_txt_record(&fqdn, value).await {
            return Err(PlaneError::ApiError(format!(
                "{} could not create TXT record {}",
                self.provider.provider_name(),
                fqdn
            )));
        }
        info!("Published challenge record {}", fqdn);
        Ok(PublishedRecord {
            fqdn,
            value: value.to_string(),
        })
    }

    /// Poll public DNS until the record is visible or the timeout passes
    pub async fn wait_for_propagation(&self, record: &PublishedRecord) -> Result<(), PlaneError> {
        let deadline = Instant::now() + self.config.timeout;
        sleep(self.config.initial_delay).await;

        loop {
            if self
                .provider
                .verify_dns_propagation(&record.fqdn, &record.value)
                .await
            {
                info!("Challenge record {} propagated", record.fqdn);
                return Ok(());
            }
            if Instant::now() + self.config.check_interval > deadline {
                return Err(PlaneError::DnsLookupError(format!(
                    "{} did not propagate within {}s",
                    record.fqdn,
                    self.config.timeout.as_secs()
                )));
            }
            debug!("Challenge record {} not visible yet", record.fqdn);
            sleep(self.config.check_interval).await;
        }
    }

    /// Remove the record. Returns the provider's verdict.
    pub async fn cleanup(&self, record: PublishedRecord) -> bool {
        let removed = self
            .provider
            .delete_txt_record(&record.fqdn, &record.value)
            .await;
        if !removed {
            warn!("Failed to remove challenge record {}", record.fqdn);
        }
        removed
    }

    /// Publish, wait, run `validate`, and remove the record whatever happened
    /// after it was created.
    pub async fn run<F, Fut, T>(&self, domain: &str, value: &str, validate: F) -> Result<T, PlaneError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PlaneError>>,
    {
        let record = self.publish(domain, value).await?;

        let result = match self.wait_for_propagation(&record).await {
            Ok(()) => validate().await,
            Err(e) => Err(e),
        };

        self.cleanup(record).await;
        result
    }
}
