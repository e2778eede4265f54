//! Certificate poll scheduler.
//!
//! Tasks are keyed by application uuid. Each tick runs every due task once;
//! a task that needs another attempt goes back into the queue with its next
//! run time, a finished task emits its terminal event and is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use webhook_payload::ApplicationRef;

use crate::certs::{CertificatePollTask, CertificatePoller, CertificateType, PollOutcome};
use crate::events::{EventSink, ProvisioningEvent};

/// Scheduler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// How often due tasks are looked for
    pub tick: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
        }
    }
}

/// Message sent to the sink of a task replaced by a newer request
pub const SUPERSEDED_MESSAGE: &str = "Superseded by a newer certificate request";

#[derive(Debug)]
struct Entry {
    id: u64,
    application: ApplicationRef,
    domains: Vec<String>,
    certificate_type: CertificateType,
    /// `None` while an attempt is running
    task: Option<CertificatePollTask>,
    sink: Arc<dyn EventSink>,
}

impl Entry {
    fn superseded(self) -> (Arc<dyn EventSink>, ProvisioningEvent) {
        let details = self
            .domains
            .iter()
            .map(|d| (d.clone(), SUPERSEDED_MESSAGE.to_string()))
            .collect();
        let event = ProvisioningEvent::Failed {
            application: self.application,
            domains: self.domains,
            certificate_type: self.certificate_type,
            error_message: SUPERSEDED_MESSAGE.to_string(),
            error_details: details,
        };
        (self.sink, event)
    }
}

#[derive(Debug)]
pub struct CertificateScheduler {
    poller: CertificatePoller,
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
}

impl CertificateScheduler {
    pub fn new(poller: CertificatePoller) -> Self {
        Self {
            poller,
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn poller(&self) -> &CertificatePoller {
        &self.poller
    }

    /// Queue `task`. A task already queued for the application is dropped
    /// and its sink gets a failure event, so every started job still ends
    /// with exactly one terminal event.
    pub async fn schedule(&self, task: CertificatePollTask, sink: Arc<dyn EventSink>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let uuid = task.application.uuid.clone();
        let entry = Entry {
            id,
            application: task.application.clone(),
            domains: task.domains.clone(),
            certificate_type: task.certificate_type,
            task: Some(task),
            sink,
        };
        let replaced = self.entries.lock().await.insert(uuid.clone(), entry);
        info!(application = %uuid, replaced = replaced.is_some(), "Scheduled certificate status checks");

        if let Some(previous) = replaced {
            let (sink, event) = previous.superseded();
            sink.emit(event).await;
        }
    }

    /// Drop the application's task. An attempt already running finishes but
    /// emits nothing.
    pub async fn cancel(&self, application_uuid: &str) -> bool {
        let cancelled = self.entries.lock().await.remove(application_uuid).is_some();
        if cancelled {
            info!(application = %application_uuid, "Cancelled certificate status checks");
        }
        cancelled
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, application_uuid: &str) -> bool {
        self.entries.lock().await.contains_key(application_uuid)
    }

    /// Next run time of the application's task, if queued and idle
    pub async fn next_run_at(&self, application_uuid: &str) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .await
            .get(application_uuid)
            .and_then(|e| e.task.as_ref())
            .map(|t| t.next_run_at)
    }

    /// Run every task due at `now` once, applications concurrently.
    /// Returns the number of attempts run.
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<(String, u64, CertificatePollTask)> = {
            let mut entries = self.entries.lock().await;
            entries
                .iter_mut()
                .filter(|(_, e)| e.task.as_ref().is_some_and(|t| t.next_run_at <= now))
                .filter_map(|(uuid, e)| e.task.take().map(|t| (uuid.clone(), e.id, t)))
                .collect()
        };

        let count = due.len();
        join_all(due.into_iter().map(|(uuid, id, mut task)| async move {
            let outcome = self.poller.poll(&mut task, now).await;
            self.settle(&uuid, id, task, outcome).await;
        }))
        .await;
        count
    }

    async fn settle(
        &self,
        uuid: &str,
        id: u64,
        task: CertificatePollTask,
        outcome: Result<PollOutcome, crate::errors::PlaneError>,
    ) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(uuid).filter(|e| e.id == id) else {
            debug!(application = %uuid, "Dropping result of cancelled certificate task");
            return;
        };

        let event = match outcome {
            Ok(PollOutcome::Retry { next_run_at }) => {
                debug!(application = %uuid, attempt = task.attempt(), %next_run_at, "Certificates still pending");
                entry.task = Some(task);
                return;
            }
            Ok(PollOutcome::Completed { certificate_details }) => ProvisioningEvent::Completed {
                application: task.application,
                domains: task.domains,
                certificate_type: task.certificate_type,
                certificate_details,
            },
            Ok(PollOutcome::Failed { message, details }) => ProvisioningEvent::Failed {
                application: task.application,
                domains: task.domains,
                certificate_type: task.certificate_type,
                error_message: message,
                error_details: details,
            },
            Err(e) => {
                error!(application = %uuid, "Certificate task error: {}", e);
                entries.remove(uuid);
                return;
            }
        };

        let sink = entry.sink.clone();
        entries.remove(uuid);
        drop(entries);
        sink.emit(event).await;
    }
}

/// Run the scheduler worker
pub async fn run<S, F>(
    options: &Options,
    scheduler: &CertificateScheduler,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Scheduler worker starting...");

    loop {
        // Check for shutdown
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Scheduler worker shutting down...");
                return;
            }
            _ = sleep_fn(options.tick) => {
                // Continue with tick
            }
        }

        let ran = scheduler.run_due(Utc::now()).await;
        if ran > 0 {
            debug!("Ran {} certificate checks", ran);
        }
    }
}
