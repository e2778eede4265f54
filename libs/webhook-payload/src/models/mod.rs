//! Webhook models

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Event name sent when certificate provisioning begins
pub const EVENT_PROVISIONING_STARTED: &str = "domain.provisioning.started";

/// Event name sent when every requested domain has a certificate
pub const EVENT_PROVISIONING_COMPLETED: &str = "domain.provisioning.completed";

/// Event name sent when provisioning ends without certificates
pub const EVENT_PROVISIONING_FAILED: &str = "domain.provisioning.failed";

/// Webhook body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub timestamp: String,
    pub data: WebhookData,

    /// Hex HMAC-SHA256 of the payload serialized without this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl WebhookPayload {
    pub fn new(event: &str, at: DateTime<Utc>, data: WebhookData) -> Self {
        Self {
            event: event.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
            data,
            signature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookData {
    pub application: ApplicationRef,
    pub domains: Vec<String>,
    pub certificate_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_details: Option<BTreeMap<String, CertificateDetails>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WebhookError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRef {
    pub uuid: String,
    pub name: String,
}

/// Per-domain issuance details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateDetails {
    pub domain: String,
    pub certificate_type: String,
    pub issued_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookError {
    pub message: String,

    /// Domain to error message
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}
