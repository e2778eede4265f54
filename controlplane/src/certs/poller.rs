//! Certificate status poller.
//!
//! A [`CertificatePollTask`] carries its own attempt counter and next run
//! time, so every attempt is a fresh, independently scheduled execution.
//! [`CertificatePoller::poll`] runs one attempt and says whether to come
//! back later or which terminal outcome to report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use webhook_payload::{ApplicationRef, CertificateDetails};

use crate::certs::acme_store::AcmeStore;
use crate::certs::fsm::{ProvisioningFsm, ProvisioningInput};
use crate::certs::CertificateType;
use crate::errors::PlaneError;
use crate::remote::{run_one, RemoteExecutor, RemoteHost};

/// Poller settings
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Attempts before pending domains time out
    pub max_attempts: u32,

    /// Fixed delay between attempts
    pub backoff: Duration,

    /// Proxy directory holding the ACME store files
    pub proxy_path: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_secs(30),
            proxy_path: "/data/coolify/proxy".to_string(),
        }
    }
}

impl PollerConfig {
    /// Message recorded for domains still pending after the last attempt
    pub fn timeout_message(&self) -> String {
        format!(
            "Certificate provisioning timeout after {} seconds",
            u64::from(self.max_attempts) * self.backoff.as_secs()
        )
    }
}

fn backoff_delta(backoff: Duration) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(backoff.as_secs()).unwrap_or(i64::MAX / 1000))
}

/// Per-domain result of the attempts so far
#[derive(Debug, Clone, PartialEq)]
pub enum DomainStatus {
    Pending,
    Provisioned(CertificateDetails),
    Failed(String),
}

/// What the caller does after an attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Run the task again at `next_run_at`
    Retry { next_run_at: DateTime<Utc> },

    Completed {
        certificate_details: BTreeMap<String, CertificateDetails>,
    },

    Failed {
        message: String,
        details: BTreeMap<String, String>,
    },
}

/// Provisioning attempt for one application and set of domains
#[derive(Debug, Clone)]
pub struct CertificatePollTask {
    pub application: ApplicationRef,
    pub host: RemoteHost,
    pub domains: Vec<String>,
    pub certificate_type: CertificateType,
    pub next_run_at: DateTime<Utc>,
    fsm: ProvisioningFsm,
    statuses: BTreeMap<String, DomainStatus>,
}

impl CertificatePollTask {
    pub fn attempt(&self) -> u32 {
        self.fsm.attempt()
    }

    pub fn max_attempts(&self) -> u32 {
        self.fsm.max_attempts()
    }

    pub fn is_finished(&self) -> bool {
        self.fsm.is_terminal()
    }

    pub fn status(&self, domain: &str) -> Option<&DomainStatus> {
        self.statuses.get(domain)
    }

    fn pending(&self) -> Vec<String> {
        self.domains
            .iter()
            .filter(|d| matches!(self.statuses.get(*d), Some(DomainStatus::Pending)))
            .cloned()
            .collect()
    }
}

/// Runs poll attempts against the proxy's store on the target host
#[derive(Debug, Clone)]
pub struct CertificatePoller {
    executor: Arc<dyn RemoteExecutor>,
    config: PollerConfig,
}

impl CertificatePoller {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: PollerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// New task due immediately
    pub fn start(
        &self,
        application: ApplicationRef,
        host: RemoteHost,
        domains: Vec<String>,
        certificate_type: CertificateType,
        now: DateTime<Utc>,
    ) -> CertificatePollTask {
        let statuses = domains
            .iter()
            .map(|d| (d.clone(), DomainStatus::Pending))
            .collect();
        CertificatePollTask {
            application,
            host,
            domains,
            certificate_type,
            next_run_at: now,
            fsm: ProvisioningFsm::new(self.config.max_attempts),
            statuses,
        }
    }

    fn store_command(&self, certificate_type: CertificateType) -> String {
        format!(
            "cat {}/{} 2>/dev/null || echo '{{}}'",
            self.config.proxy_path.trim_end_matches('/'),
            certificate_type.store_file()
        )
    }

    /// Run one attempt. Fails only when called on a finished task.
    pub async fn poll(&self, task: &mut CertificatePollTask, now: DateTime<Utc>) -> Result<PollOutcome, PlaneError> {
        if task.is_finished() {
            return Err(PlaneError::ValidationError(format!(
                "certificate task for {} already finished",
                task.application.uuid
            )));
        }

        let pending = task.pending();
        debug!(
            application = %task.application.uuid,
            attempt = task.attempt(),
            pending = pending.len(),
            "Checking certificate status"
        );

        let command = self.store_command(task.certificate_type);
        let read = tokio::time::timeout(self.config.backoff, run_one(&*self.executor, &task.host, command));
        match read.await {
            Err(_) => {
                // a slow host must not hold up the attempt schedule
                warn!(
                    application = %task.application.uuid,
                    "Certificate store read timed out after {:?}", self.config.backoff
                );
            }
            Ok(Ok(content)) => {
                // unreadable or partially written store: still pending
                if let Some(store) = AcmeStore::parse(&content) {
                    for domain in pending {
                        if store.covers(&domain) {
                            let details = CertificateDetails {
                                domain: domain.clone(),
                                certificate_type: task.certificate_type.as_str().to_string(),
                                issued_at: now.to_rfc3339(),
                            };
                            task.statuses.insert(domain, DomainStatus::Provisioned(details));
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(application = %task.application.uuid, "Failed to read certificate store: {}", e);
                for domain in pending {
                    task.statuses
                        .insert(domain, DomainStatus::Failed(format!("Failed to check certificate: {}", e)));
                }
            }
        }

        let pending = task.pending();
        if !pending.is_empty() {
            if task.fsm.can_retry() {
                task.fsm
                    .process(ProvisioningInput::Retry)
                    .map_err(PlaneError::Internal)?;
                task.next_run_at = now + backoff_delta(self.config.backoff);
                return Ok(PollOutcome::Retry {
                    next_run_at: task.next_run_at,
                });
            }
            for domain in pending {
                task.statuses
                    .insert(domain, DomainStatus::Failed(self.config.timeout_message()));
            }
        }

        Ok(self.finish(task))
    }

    fn finish(&self, task: &mut CertificatePollTask) -> PollOutcome {
        let mut certificate_details = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut messages = Vec::new();

        for domain in &task.domains {
            match task.statuses.get(domain) {
                Some(DomainStatus::Provisioned(details)) => {
                    certificate_details.insert(domain.clone(), details.clone());
                }
                Some(DomainStatus::Failed(error)) => {
                    if errors.insert(domain.clone(), error.clone()).is_none() {
                        messages.push(error.clone());
                    }
                }
                Some(DomainStatus::Pending) | None => {}
            }
        }

        if errors.is_empty() {
            // pending tasks accept a terminal input exactly once
            let _ = task.fsm.process(ProvisioningInput::AllProvisioned);
            info!(
                application = %task.application.uuid,
                domains = task.domains.len(),
                "Certificates provisioned"
            );
            PollOutcome::Completed { certificate_details }
        } else {
            let message = messages.join("; ");
            let _ = task.fsm.process(ProvisioningInput::Failed(message.clone()));
            warn!(application = %task.application.uuid, "Certificate provisioning failed: {}", message);
            PollOutcome::Failed {
                message,
                details: errors,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RecordingExecutor;

    const STORE: &str = r#"{"letsencrypt-dns": {"Certificates": [
        {"domain": {"main": "example.com", "sans": ["*.example.com"]}}
    ]}}"#;

    fn app() -> ApplicationRef {
        ApplicationRef {
            uuid: "app1".to_string(),
            name: "web".to_string(),
        }
    }

    fn poller(executor: RecordingExecutor, max_attempts: u32) -> (CertificatePoller, Arc<RecordingExecutor>) {
        let executor = Arc::new(executor);
        let config = PollerConfig {
            max_attempts,
            ..PollerConfig::default()
        };
        (CertificatePoller::new(executor.clone(), config), executor)
    }

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|d| d.to_string()).collect()
    }

    #[tokio::test]
    async fn test_wildcard_sans_provisions() {
        let (poller, executor) = poller(RecordingExecutor::new().respond("acme-dns.json", STORE), 10);
        let now = Utc::now();
        let mut task = poller.start(
            app(),
            RemoteHost::new("srv", "10.0.0.1"),
            domains(&["site1.example.com"]),
            CertificateType::Dns01,
            now,
        );

        match poller.poll(&mut task, now).await.unwrap() {
            PollOutcome::Completed { certificate_details } => {
                let details = &certificate_details["site1.example.com"];
                assert_eq!(details.certificate_type, "dns-01");
                assert_eq!(details.issued_at, now.to_rfc3339());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(task.is_finished());
        assert_eq!(
            executor.calls(),
            vec!["cat /data/coolify/proxy/acme-dns.json 2>/dev/null || echo '{}'"]
        );
        assert!(poller.poll(&mut task, now).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_until_timeout() {
        let (poller, executor) = poller(RecordingExecutor::new().respond("acme.json", STORE), 3);
        let now = Utc::now();
        let mut task = poller.start(
            app(),
            RemoteHost::new("srv", "10.0.0.1"),
            domains(&["other.org"]),
            CertificateType::Http01,
            now,
        );

        for attempt in 1..3 {
            assert_eq!(task.attempt(), attempt);
            let outcome = poller.poll(&mut task, now).await.unwrap();
            assert_eq!(
                outcome,
                PollOutcome::Retry {
                    next_run_at: now + chrono::Duration::seconds(30)
                }
            );
        }

        match poller.poll(&mut task, now).await.unwrap() {
            PollOutcome::Failed { message, details } => {
                assert_eq!(message, "Certificate provisioning timeout after 90 seconds");
                assert_eq!(details["other.org"], message);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_read_failure_fails_pending_domains() {
        let (poller, _) = poller(RecordingExecutor::new().fail("cat", "connection refused"), 10);
        let now = Utc::now();
        let mut task = poller.start(
            app(),
            RemoteHost::new("srv", "10.0.0.1"),
            domains(&["a.example.com", "b.example.com"]),
            CertificateType::Dns01,
            now,
        );

        match poller.poll(&mut task, now).await.unwrap() {
            PollOutcome::Failed { message, details } => {
                assert_eq!(details.len(), 2);
                assert!(details["a.example.com"].starts_with("Failed to check certificate: "));
                assert!(message.contains("; "));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_stays_pending() {
        let executor = Arc::new(RecordingExecutor::new().unreachable("10.0.0.1"));
        let poller = CertificatePoller::new(
            executor,
            PollerConfig {
                max_attempts: 10,
                backoff: Duration::from_millis(50),
                ..PollerConfig::default()
            },
        );
        let now = Utc::now();
        let mut task = poller.start(
            app(),
            RemoteHost::new("srv", "10.0.0.1"),
            domains(&["site1.example.com"]),
            CertificateType::Dns01,
            now,
        );

        assert!(matches!(
            poller.poll(&mut task, now).await.unwrap(),
            PollOutcome::Retry { .. }
        ));
        assert_eq!(task.status("site1.example.com"), Some(&DomainStatus::Pending));
        assert_eq!(task.attempt(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_store_is_pending() {
        let (poller, _) = poller(RecordingExecutor::new().respond("cat", "{\"letsencrypt\": {"), 2);
        let now = Utc::now();
        let mut task = poller.start(
            app(),
            RemoteHost::new("srv", "10.0.0.1"),
            domains(&["site1.example.com"]),
            CertificateType::Dns01,
            now,
        );

        assert!(matches!(
            poller.poll(&mut task, now).await.unwrap(),
            PollOutcome::Retry { .. }
        ));
        assert_eq!(task.status("site1.example.com"), Some(&DomainStatus::Pending));
    }
}
