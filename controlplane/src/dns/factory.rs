//! Provider lookup by name, credential schemas and credential validation

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::dns::cloudflare::CloudflareProvider;
use crate::dns::digitalocean::DigitalOceanProvider;
use crate::dns::route53::Route53Provider;
use crate::dns::{DnsCredentials, DnsProvider, ProviderContext};
use crate::errors::PlaneError;

/// Provider identifiers and display names
const PROVIDERS: [(&str, &str); 3] = [
    ("cloudflare", "Cloudflare"),
    ("route53", "AWS Route53"),
    ("digitalocean", "DigitalOcean"),
];

/// One credential input in a provider's schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    pub helper: &'static str,
}

impl FieldSpec {
    const fn new(label: &'static str, field_type: &'static str, required: bool, helper: &'static str) -> Self {
        Self {
            label,
            field_type,
            required,
            default: None,
            helper,
        }
    }
}

/// Why a validation failed, or `Ok`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    Ok,
    UnsupportedProvider,
    Construction,
    Rejected,
}

/// Result of [`DnsProviderFactory::validate_provider_credentials`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialValidation {
    pub valid: bool,
    pub message: String,
    pub kind: ValidationKind,
}

impl CredentialValidation {
    fn invalid(kind: ValidationKind, message: String) -> Self {
        Self {
            valid: false,
            message,
            kind,
        }
    }
}

/// Builds provider clients that share one [`ProviderContext`]
#[derive(Debug, Clone)]
pub struct DnsProviderFactory {
    context: ProviderContext,
}

impl DnsProviderFactory {
    pub fn new(context: ProviderContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Build a client for `provider`. The name is matched case-insensitively.
    pub fn create(&self, provider: &str, credentials: &DnsCredentials) -> Result<Arc<dyn DnsProvider>, PlaneError> {
        match provider.to_ascii_lowercase().as_str() {
            "cloudflare" => Ok(Arc::new(CloudflareProvider::new(credentials, &self.context)?)),
            "route53" => Ok(Arc::new(Route53Provider::new(credentials, &self.context)?)),
            "digitalocean" => Ok(Arc::new(DigitalOceanProvider::new(credentials, &self.context)?)),
            _ => Err(PlaneError::InvalidProvider(provider.to_string())),
        }
    }

    pub fn supported_providers() -> Vec<(&'static str, &'static str)> {
        PROVIDERS.to_vec()
    }

    pub fn is_supported(provider: &str) -> bool {
        let provider = provider.to_ascii_lowercase();
        PROVIDERS.iter().any(|(id, _)| *id == provider)
    }

    /// Credential schema for UI forms. Empty for unknown providers.
    pub fn get_required_fields(provider: &str) -> BTreeMap<&'static str, FieldSpec> {
        let mut fields = BTreeMap::new();
        match provider.to_ascii_lowercase().as_str() {
            "cloudflare" => {
                fields.insert(
                    "api_token",
                    FieldSpec::new("API Token", "password", false, "Recommended: API Token with Zone:DNS:Edit permissions"),
                );
                fields.insert(
                    "email",
                    FieldSpec::new("Email", "email", false, "Alternative: Use with Global API Key"),
                );
                fields.insert(
                    "api_key",
                    FieldSpec::new("Global API Key", "password", false, "Alternative: Use with Email"),
                );
                fields.insert(
                    "zone_id",
                    FieldSpec::new("Zone ID", "text", false, "Optional: Will be auto-detected if not provided"),
                );
            }
            "route53" => {
                fields.insert(
                    "access_key_id",
                    FieldSpec::new("Access Key ID", "password", true, "AWS IAM Access Key ID"),
                );
                fields.insert(
                    "secret_access_key",
                    FieldSpec::new("Secret Access Key", "password", true, "AWS IAM Secret Access Key"),
                );
                fields.insert(
                    "region",
                    FieldSpec {
                        default: Some("us-east-1"),
                        ..FieldSpec::new("Region", "text", false, "AWS Region (default: us-east-1)")
                    },
                );
            }
            "digitalocean" => {
                fields.insert(
                    "auth_token",
                    FieldSpec::new("API Token", "password", true, "DigitalOcean Personal Access Token"),
                );
            }
            _ => {}
        }
        fields
    }

    pub fn documentation_url(provider: &str) -> Option<&'static str> {
        match provider.to_ascii_lowercase().as_str() {
            "cloudflare" => Some("https://developers.cloudflare.com/fundamentals/api/get-started/create-token/"),
            "route53" => Some("https://docs.aws.amazon.com/Route53/latest/DeveloperGuide/Welcome.html"),
            "digitalocean" => Some("https://docs.digitalocean.com/reference/api/create-personal-access-token/"),
            _ => None,
        }
    }

    /// Construct the provider and make one authenticated call. Never errors;
    /// failures are reported in the result with a distinct `kind`.
    pub async fn validate_provider_credentials(
        &self,
        provider: &str,
        credentials: &DnsCredentials,
    ) -> CredentialValidation {
        let client = match self.create(provider, credentials) {
            Ok(client) => client,
            Err(e @ PlaneError::InvalidProvider(_)) => {
                return CredentialValidation::invalid(ValidationKind::UnsupportedProvider, e.to_string())
            }
            Err(e) => {
                return CredentialValidation::invalid(
                    ValidationKind::Construction,
                    format!("Validation error: {}", e),
                )
            }
        };

        if client.validate_credentials().await {
            info!("{} credentials validated", client.provider_name());
            CredentialValidation {
                valid: true,
                message: "Credentials validated successfully".to_string(),
                kind: ValidationKind::Ok,
            }
        } else {
            warn!("{} credentials rejected", client.provider_name());
            CredentialValidation::invalid(
                ValidationKind::Rejected,
                "Failed to validate credentials. Please check your API keys.".to_string(),
            )
        }
    }
}
