//! Provisioning lifecycle events and the sinks that receive them

pub mod webhook;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use webhook_payload::{
    ApplicationRef, CertificateDetails, WebhookData, WebhookError, WebhookPayload, EVENT_PROVISIONING_COMPLETED,
    EVENT_PROVISIONING_FAILED, EVENT_PROVISIONING_STARTED,
};

use crate::certs::CertificateType;

pub use webhook::{sign, WebhookSender};

#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningEvent {
    Started {
        application: ApplicationRef,
        domains: Vec<String>,
        certificate_type: CertificateType,
    },
    Completed {
        application: ApplicationRef,
        domains: Vec<String>,
        certificate_type: CertificateType,
        certificate_details: BTreeMap<String, CertificateDetails>,
    },
    Failed {
        application: ApplicationRef,
        domains: Vec<String>,
        certificate_type: CertificateType,
        error_message: String,
        error_details: BTreeMap<String, String>,
    },
}

impl ProvisioningEvent {
    /// Webhook event name
    pub fn name(&self) -> &'static str {
        match self {
            ProvisioningEvent::Started { .. } => EVENT_PROVISIONING_STARTED,
            ProvisioningEvent::Completed { .. } => EVENT_PROVISIONING_COMPLETED,
            ProvisioningEvent::Failed { .. } => EVENT_PROVISIONING_FAILED,
        }
    }

    pub fn application(&self) -> &ApplicationRef {
        match self {
            ProvisioningEvent::Started { application, .. }
            | ProvisioningEvent::Completed { application, .. }
            | ProvisioningEvent::Failed { application, .. } => application,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProvisioningEvent::Started { .. })
    }

    /// Unsigned webhook body for this event
    pub fn to_payload(&self, at: DateTime<Utc>) -> WebhookPayload {
        let (domains, certificate_type) = match self {
            ProvisioningEvent::Started {
                domains,
                certificate_type,
                ..
            }
            | ProvisioningEvent::Completed {
                domains,
                certificate_type,
                ..
            }
            | ProvisioningEvent::Failed {
                domains,
                certificate_type,
                ..
            } => (domains, certificate_type),
        };

        let mut data = WebhookData {
            application: self.application().clone(),
            domains: domains.clone(),
            certificate_type: certificate_type.as_str().to_string(),
            certificate_details: None,
            error: None,
        };
        match self {
            ProvisioningEvent::Completed {
                certificate_details, ..
            } if !certificate_details.is_empty() => {
                data.certificate_details = Some(certificate_details.clone());
            }
            ProvisioningEvent::Failed {
                error_message,
                error_details,
                ..
            } => {
                data.error = Some(WebhookError {
                    message: error_message.clone(),
                    details: error_details.clone(),
                });
            }
            _ => {}
        }

        WebhookPayload::new(self.name(), at, data)
    }
}

/// Receiver of provisioning events
#[async_trait]
pub trait EventSink: Send + Sync + Debug {
    async fn emit(&self, event: ProvisioningEvent);
}

/// Logs every event and forwards it to the webhook when one is configured
#[derive(Debug, Default)]
pub struct Notifier {
    webhook: Option<WebhookSender>,
}

impl Notifier {
    pub fn new(webhook: Option<WebhookSender>) -> Self {
        Self { webhook }
    }
}

#[async_trait]
impl EventSink for Notifier {
    async fn emit(&self, event: ProvisioningEvent) {
        let application = &event.application().uuid;
        match &event {
            ProvisioningEvent::Failed { error_message, .. } => {
                warn!(application = %application, event = event.name(), "{}", error_message)
            }
            _ => info!(application = %application, event = event.name(), "Provisioning event"),
        }

        if let Some(webhook) = &self.webhook {
            if let Err(e) = webhook.send(&event, Utc::now()).await {
                warn!(application = %application, "Webhook delivery failed: {}", e);
            }
        }
    }
}

/// Keeps events in memory for inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProvisioningEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ProvisioningEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&self, event: ProvisioningEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
