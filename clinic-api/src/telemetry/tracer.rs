//! Tracing Subscriber Initialization
//!
//! Structured logs to stdout, JSON by default. The filter comes from
//! `RUST_LOG` when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

const DEFAULT_FILTER: &str = "clinic_api=debug,tower_http=info,info";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pretty" | "text" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "clinic-api".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables.
    ///
    /// - `CLINIC_SERVICE_NAME` (default: clinic-api)
    /// - `CLINIC_SERVICE_VERSION` (default: crate version)
    /// - `CLINIC_ENVIRONMENT` (default: development)
    /// - `CLINIC_LOG_FORMAT`: `json` or `pretty` (default: json)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("CLINIC_SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: std::env::var("CLINIC_SERVICE_VERSION")
                .unwrap_or(defaults.service_version),
            environment: std::env::var("CLINIC_ENVIRONMENT").unwrap_or(defaults.environment),
            log_format: std::env::var("CLINIC_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.log_format),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Call once at startup before any tracing occurs.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        environment = %config.environment,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::{self, EnvVarGuard};

    #[test]
    fn test_telemetry_config_default_ignores_env() {
        let _lock = test_env::lock();
        let _name = EnvVarGuard::set("CLINIC_SERVICE_NAME", Some("front-desk"));
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "clinic-api");
        assert_eq!(config.environment, "development");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_telemetry_config_from_env() {
        let _lock = test_env::lock();
        let _name = EnvVarGuard::set("CLINIC_SERVICE_NAME", Some("front-desk"));
        let _env = EnvVarGuard::set("CLINIC_ENVIRONMENT", Some("staging"));
        let _format = EnvVarGuard::set("CLINIC_LOG_FORMAT", Some("pretty"));
        let _version = EnvVarGuard::set("CLINIC_SERVICE_VERSION", None);

        let config = TelemetryConfig::from_env();
        assert_eq!(config.service_name, "front-desk");
        assert_eq!(config.environment, "staging");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.service_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_telemetry_config_from_env_defaults() {
        let _lock = test_env::lock();
        let _name = EnvVarGuard::set("CLINIC_SERVICE_NAME", None);
        let _format = EnvVarGuard::set("CLINIC_LOG_FORMAT", None);

        let config = TelemetryConfig::from_env();
        assert_eq!(config.service_name, "clinic-api");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }
}
