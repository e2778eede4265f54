//! Webhook delivery for provisioning events

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use webhook_payload::WebhookPayload;

use crate::errors::PlaneError;
use crate::events::ProvisioningEvent;
use crate::http::client::{Auth, RestClient};
use crate::models::server::ServerSettings;
use crate::utils::hmac_sha256_hex;

/// Hex HMAC-SHA256 of `payload` under `secret`
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    hmac_sha256_hex(secret, payload)
}

/// Sign the payload serialized without its `signature` field and attach the
/// signature
pub fn sign_payload(payload: &mut WebhookPayload, secret: &SecretString) -> Result<(), PlaneError> {
    payload.signature = None;
    let body = serde_json::to_vec(payload)?;
    payload.signature = Some(sign(&body, secret.expose_secret().as_bytes()));
    Ok(())
}

/// Posts signed payloads to one webhook URL
#[derive(Debug)]
pub struct WebhookSender {
    client: RestClient,
    secret: Option<SecretString>,
}

impl WebhookSender {
    pub fn new(url: &str, secret: Option<SecretString>, timeout: Duration) -> Result<Self, PlaneError> {
        let url = url::Url::parse(url).map_err(|e| PlaneError::ConfigError(format!("invalid webhook url: {}", e)))?;
        Ok(Self {
            client: RestClient::new(url.as_str(), timeout, Auth::None)?,
            secret,
        })
    }

    /// Sender for a server, or `None` when webhooks are off or have no URL
    pub fn from_settings(settings: &ServerSettings, timeout: Duration) -> Result<Option<Self>, PlaneError> {
        let url = match settings.webhook_url.as_deref().map(str::trim) {
            Some(url) if settings.webhook_enabled && !url.is_empty() => url,
            _ => return Ok(None),
        };
        let secret = settings
            .webhook_secret
            .as_ref()
            .map(|s| SecretString::from(s.expose_secret().to_string()));
        Self::new(url, secret, timeout).map(Some)
    }

    /// Payload for `event`, signed when a secret is configured
    pub fn payload(&self, event: &ProvisioningEvent, at: DateTime<Utc>) -> Result<WebhookPayload, PlaneError> {
        let mut payload = event.to_payload(at);
        if let Some(secret) = &self.secret {
            sign_payload(&mut payload, secret)?;
        }
        Ok(payload)
    }

    pub async fn send(&self, event: &ProvisioningEvent, at: DateTime<Utc>) -> Result<(), PlaneError> {
        // typed body keeps the field order the signature was computed over
        let body = serde_json::to_string(&self.payload(event, at)?)?;
        let headers = [("content-type".to_string(), "application/json".to_string())];
        let response = self.client.send_signed(Method::POST, "", &headers, body).await?;
        if !response.is_success() {
            return Err(PlaneError::WebhookError(format!(
                "{} returned {}",
                self.client.base_url(),
                response.status
            )));
        }
        debug!("Delivered {} to {}", event.name(), self.client.base_url());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::CertificateType;
    use webhook_payload::ApplicationRef;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn started() -> ProvisioningEvent {
        ProvisioningEvent::Started {
            application: ApplicationRef {
                uuid: "app1".to_string(),
                name: "web".to_string(),
            },
            domains: vec!["a.example.com".to_string()],
            certificate_type: CertificateType::Dns01,
        }
    }

    #[test]
    fn test_sign_is_deterministic_and_sensitive() {
        let a = sign(b"{\"event\":\"x\"}", b"secret");
        assert_eq!(a.len(), 64);
        assert_eq!(a, sign(b"{\"event\":\"x\"}", b"secret"));
        assert_ne!(a, sign(b"{\"event\":\"y\"}", b"secret"));
        assert_ne!(a, sign(b"{\"event\":\"x\"}", b"secres"));
    }

    #[test]
    fn test_signature_covers_unsigned_body() {
        let sender = WebhookSender::new(
            "https://hooks.example.com/keel",
            Some(SecretString::from("s3cret".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        let at = Utc::now();
        let payload = sender.payload(&started(), at).unwrap();

        let unsigned = serde_json::to_vec(&started().to_payload(at)).unwrap();
        assert_eq!(payload.signature, Some(sign(&unsigned, b"s3cret")));
    }

    #[tokio::test]
    async fn test_wire_body_verifies_against_signature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(
            &server.uri(),
            Some(SecretString::from("s3cret".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        sender.send(&started(), Utc::now()).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let wire = String::from_utf8(requests[0].body.clone()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        let signature = value["signature"].as_str().unwrap();

        // signature is the last field; the rest is the signed body verbatim
        let suffix = format!(",\"signature\":\"{}\"}}", signature);
        let unsigned = format!("{}}}", wire.strip_suffix(&suffix).unwrap());
        assert!(unsigned.starts_with("{\"event\":"));
        assert_eq!(signature, sign(unsigned.as_bytes(), b"s3cret"));
        assert_eq!(
            requests[0].headers.get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_from_settings_requires_enabled_url() {
        let mut settings = ServerSettings::default();
        settings.webhook_url = Some("https://hooks.example.com".to_string());
        assert!(WebhookSender::from_settings(&settings, Duration::from_secs(5))
            .unwrap()
            .is_none());

        settings.webhook_enabled = true;
        assert!(WebhookSender::from_settings(&settings, Duration::from_secs(5))
            .unwrap()
            .is_some());

        settings.webhook_url = Some("not a url".to_string());
        assert!(WebhookSender::from_settings(&settings, Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn test_send_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "event": "domain.provisioning.started",
                "data": {"application": {"uuid": "app1"}}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookSender::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        sender.send(&started(), Utc::now()).await.unwrap();

        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&failing)
            .await;
        let sender = WebhookSender::new(&failing.uri(), None, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            sender.send(&started(), Utc::now()).await,
            Err(PlaneError::WebhookError(_))
        ));
    }
}
