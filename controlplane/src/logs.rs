//! Logging setup driven by [`Settings`]. `RUST_LOG`, when set, replaces the
//! computed filter entirely.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::PlaneError;
use crate::storage::settings::Settings;

/// Crates whose own debug output drowns out ours
const NOISY_TARGETS: &[&str] = &["hyper_util", "reqwest", "hickory_proto", "hickory_resolver", "tower_http"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging options
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub log_level: LogLevel,

    /// JSON lines instead of the human readable format
    pub json_format: bool,
}

impl From<&Settings> for LogOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            log_level: settings.log_level,
            json_format: settings.log_json,
        }
    }
}

impl LogOptions {
    /// Filter directives: our level everywhere, and at most `warn` for the
    /// HTTP and DNS plumbing unless we are tracing
    pub fn filter_directives(&self) -> String {
        let mut directives = vec![self.log_level.as_str().to_string()];
        if self.log_level != LogLevel::Trace {
            let plumbing = match self.log_level {
                LogLevel::Error => "error",
                _ => "warn",
            };
            directives.extend(NOISY_TARGETS.iter().map(|t| format!("{}={}", t, plumbing)));
        }
        directives.join(",")
    }
}

/// Install the global subscriber, writing to stdout
pub fn init_logging(options: &LogOptions) -> Result<(), PlaneError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(options.filter_directives()))
        .map_err(|e| PlaneError::ConfigError(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if options.json_format {
        registry.with(fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    result.map_err(|e| PlaneError::ConfigError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_settings_json() {
        let settings: Settings = serde_json::from_str(r#"{"log_level": "warning", "log_json": true}"#).unwrap();
        let options = LogOptions::from(&settings);
        assert_eq!(options.log_level, LogLevel::Warn);
        assert!(options.json_format);
        assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());
    }

    #[test]
    fn test_plumbing_is_quieted_below_trace() {
        let options = LogOptions {
            log_level: LogLevel::Debug,
            json_format: false,
        };
        let directives = options.filter_directives();
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("hickory_proto=warn"));
        assert!(directives.contains("reqwest=warn"));

        let options = LogOptions {
            log_level: LogLevel::Trace,
            json_format: false,
        };
        assert_eq!(options.filter_directives(), "trace");

        let options = LogOptions {
            log_level: LogLevel::Error,
            json_format: false,
        };
        assert!(options.filter_directives().contains("hyper_util=error"));
    }
}
