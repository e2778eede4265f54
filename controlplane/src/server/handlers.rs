//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use webhook_payload::ApplicationRef;

use crate::certs::CertificateType;
use crate::dns::{DnsCredentials, DnsProviderFactory};
use crate::errors::PlaneError;
use crate::events::ProvisioningEvent;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error response carrying a `{"message": ...}` body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

impl From<PlaneError> for ApiError {
    fn from(err: PlaneError) -> Self {
        let status = match &err {
            PlaneError::NotFound(_) => StatusCode::NOT_FOUND,
            PlaneError::ValidationError(_) | PlaneError::Unsupported(_) => StatusCode::BAD_REQUEST,
            e if e.is_configuration() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "keel".to_string(),
        version: version_info().version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

// ================================ APPLICATIONS ==================================== //

pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state.resolve(&uuid).await?;
    let status = resolved.orchestrator.get_status(&resolved.target, &resolved.app).await;
    Ok(Json(json!({
        "orchestrator": resolved.target.orchestrator.as_str(),
        "status": status,
    })))
}

pub async fn resources_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state.resolve(&uuid).await?;
    let resources = resolved.orchestrator.get_resources(&resolved.target, &resolved.app).await;
    Ok(Json(json!({
        "orchestrator": resolved.target.orchestrator.as_str(),
        "resources": resources,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ScaleRequest {
    /// A positive integer, as a number or a numeric string
    #[serde(default)]
    pub replicas: Option<Value>,
}

fn parse_replicas(value: Option<&Value>) -> Option<u32> {
    let replicas = match value? {
        Value::Number(n) => u32::try_from(n.as_u64()?).ok()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (replicas > 0).then_some(replicas)
}

pub async fn scale_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
    Json(request): Json<ScaleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(replicas) = parse_replicas(request.replicas.as_ref()) else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Valid replicas count is required."));
    };

    let resolved = state
        .resolve(&uuid)
        .await
        .map_err(|_| ApiError::new(StatusCode::NOT_FOUND, "Application not found."))?;

    let orchestrator = resolved.target.orchestrator;
    if !orchestrator.uses_orchestration() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "This application does not support scaling. The server is using standalone Docker orchestration.",
        ));
    }

    if let Err(e) = resolved
        .orchestrator
        .scale(&resolved.target, &resolved.app, replicas)
        .await
    {
        error!(application = %uuid, "Scaling failed: {}", e);
        return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    Ok(Json(json!({
        "message": "Application scaled successfully.",
        "orchestrator": orchestrator.as_str(),
        "replicas": replicas,
    })))
}

// ================================ CERTIFICATES ==================================== //

#[derive(Debug, Default, Deserialize)]
pub struct CertificateRequest {
    /// Defaults to the application's domains
    #[serde(default)]
    pub domains: Vec<String>,

    /// Defaults to the challenge the proxy picks for the domains
    #[serde(default)]
    pub certificate_type: Option<String>,
}

/// Announce provisioning and start watching the proxy's certificate store
pub async fn start_certificates_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
    Json(request): Json<CertificateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state.resolve(&uuid).await?;

    let mut domains: Vec<String> = request
        .domains
        .iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    if domains.is_empty() {
        domains = resolved.app.domains();
    }
    if domains.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No domains to provision."));
    }

    let certificate_type = match request.certificate_type.as_deref() {
        Some(name) => name.parse::<CertificateType>()?,
        None => CertificateType::for_domains(&resolved.server.settings, &domains),
    };

    let sink = state.sink_for(&resolved.server)?;
    let application = ApplicationRef {
        uuid: resolved.app.uuid.clone(),
        name: resolved.app.name.clone(),
    };
    sink.emit(ProvisioningEvent::Started {
        application: application.clone(),
        domains: domains.clone(),
        certificate_type,
    })
    .await;

    let task = state.scheduler.poller().start(
        application,
        resolved.server.remote_host(),
        domains.clone(),
        certificate_type,
        Utc::now(),
    );
    state.scheduler.schedule(task, sink).await;
    info!(application = %uuid, domains = domains.len(), "Certificate provisioning started");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Certificate provisioning started.",
            "application": uuid,
            "domains": domains,
            "certificate_type": certificate_type,
            "max_attempts": state.scheduler.poller().config().max_attempts,
        })),
    ))
}

pub async fn cancel_certificates_handler(
    State(state): State<Arc<ServerState>>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.scheduler.cancel(&uuid).await {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "No certificate provisioning in progress.",
        ));
    }
    Ok(Json(json!({ "message": "Certificate provisioning cancelled." })))
}

// ================================ DNS PROVIDERS =================================== //

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub label: &'static str,
    pub documentation_url: Option<&'static str>,
}

pub async fn providers_handler() -> impl IntoResponse {
    let providers: Vec<ProviderInfo> = DnsProviderFactory::supported_providers()
        .into_iter()
        .map(|(name, label)| ProviderInfo {
            name,
            label,
            documentation_url: DnsProviderFactory::documentation_url(name),
        })
        .collect();
    Json(json!({ "providers": providers }))
}

pub async fn provider_fields_handler(Path(name): Path<String>) -> Result<impl IntoResponse, ApiError> {
    if !DnsProviderFactory::is_supported(&name) {
        return Err(PlaneError::NotFound(format!("Unsupported DNS provider: {}", name)).into());
    }
    Ok(Json(json!({
        "provider": name.to_ascii_lowercase(),
        "fields": DnsProviderFactory::get_required_fields(&name),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub credentials: DnsCredentials,
}

/// Always 200; the body says whether and why validation failed
pub async fn validate_provider_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(request): Json<ValidateRequest>,
) -> impl IntoResponse {
    Json(
        state
            .dns_providers
            .validate_provider_credentials(&name, &request.credentials)
            .await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replicas() {
        assert_eq!(parse_replicas(Some(&json!(3))), Some(3));
        assert_eq!(parse_replicas(Some(&json!("4"))), Some(4));
        assert_eq!(parse_replicas(Some(&json!(0))), None);
        assert_eq!(parse_replicas(Some(&json!(-1))), None);
        assert_eq!(parse_replicas(Some(&json!("two"))), None);
        assert_eq!(parse_replicas(Some(&json!(1.5))), None);
        assert_eq!(parse_replicas(None), None);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError::from(PlaneError::NotFound("applications x".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(PlaneError::InvalidProvider("bogus".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PlaneError::Internal("boom".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
