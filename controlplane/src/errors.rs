//! Error types for the Keel control plane

use thiserror::Error;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum PlaneError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("XML error: {0}")]
    XmlError(String),

    #[error("Unsupported DNS provider: {0}")]
    InvalidProvider(String),

    #[error("{provider} credentials not configured: missing {field}")]
    MissingCredential { provider: String, field: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A remote command exited unsuccessfully; carries its output
    #[error("Remote command failed ({command}): {output}")]
    RemoteError { command: String, output: String },

    #[error("{operation} failed for {target}: {message}")]
    OrchestratorError {
        operation: String,
        target: String,
        message: String,
    },

    #[error("{0}")]
    Unsupported(String),

    /// Non-success response from an upstream HTTP API
    #[error("API error: {0}")]
    ApiError(String),

    #[error("DNS lookup failed: {0}")]
    DnsLookupError(String),

    #[error("Webhook error: {0}")]
    WebhookError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaneError {
    /// Annotate a lower-level failure with the operation and target it happened in.
    pub fn during(operation: &str, target: &str, err: PlaneError) -> Self {
        match err {
            PlaneError::Unsupported(_) | PlaneError::OrchestratorError { .. } => err,
            other => PlaneError::OrchestratorError {
                operation: operation.to_string(),
                target: target.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Configuration errors are never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PlaneError::InvalidProvider(_)
                | PlaneError::MissingCredential { .. }
                | PlaneError::ConfigError(_)
        )
    }
}

impl From<anyhow::Error> for PlaneError {
    fn from(err: anyhow::Error) -> Self {
        PlaneError::Internal(err.to_string())
    }
}

impl From<quick_xml::Error> for PlaneError {
    fn from(err: quick_xml::Error) -> Self {
        PlaneError::XmlError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_during_wraps_remote_errors() {
        let err = PlaneError::RemoteError {
            command: "docker stop abc".to_string(),
            output: "No such container".to_string(),
        };
        let wrapped = PlaneError::during("stop", "abc", err);
        let msg = wrapped.to_string();
        assert!(msg.starts_with("stop failed for abc"));
        assert!(msg.contains("No such container"));
    }

    #[test]
    fn test_during_keeps_unsupported() {
        let err = PlaneError::Unsupported("nope".to_string());
        assert!(matches!(
            PlaneError::during("scale", "abc", err),
            PlaneError::Unsupported(_)
        ));
    }

    #[test]
    fn test_invalid_provider_names_identifier() {
        let err = PlaneError::InvalidProvider("bogus".to_string());
        assert_eq!(err.to_string(), "Unsupported DNS provider: bogus");
        assert!(err.is_configuration());
    }
}
