//! API Configuration Module
//!
//! Server, CORS, realtime and store selection settings. Configuration is
//! loaded from environment variables with sensible defaults for development.

use std::net::SocketAddr;

use crate::error::{ApiError, ApiResult};

/// Default mount point for the queue routes and the WebSocket endpoint.
pub const DEFAULT_BASE_PATH: &str = "/clinic-crm-api";

/// Default per-connection realtime buffer (messages).
pub const DEFAULT_WS_BUFFER: usize = 64;

// ============================================================================
// STORE BACKEND
// ============================================================================

/// Which queue store the server runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store; state is lost on restart.
    #[default]
    Memory,
    /// Shared PostgreSQL store.
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            other => Err(ApiError::invalid_input(format!(
                "Unknown store backend '{}', expected 'memory' or 'postgres'",
                other
            ))),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for binding, CORS, realtime delivery and storage.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Server
    // ========================================================================
    /// Interface to bind.
    pub bind_host: String,

    /// Port to bind.
    pub port: u16,

    /// Prefix for the queue routes and the WebSocket endpoint.
    pub base_path: String,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Realtime
    // ========================================================================
    /// Bounded buffer per WebSocket connection.
    pub ws_buffer: usize,

    // ========================================================================
    // Storage
    // ========================================================================
    pub store_backend: StoreBackend,

    /// Apply the bundled schema at startup (postgres backend only).
    pub run_migrations: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            base_path: DEFAULT_BASE_PATH.to_string(),
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
            ws_buffer: DEFAULT_WS_BUFFER,
            store_backend: StoreBackend::Memory,
            run_migrations: true,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CLINIC_API_BIND`: Interface to bind (default: 0.0.0.0)
    /// - `PORT` / `CLINIC_API_PORT`: Port (default: 3000)
    /// - `CLINIC_BASE_PATH`: Route prefix (default: /clinic-crm-api)
    /// - `CLINIC_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `CLINIC_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `CLINIC_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `CLINIC_WS_BUFFER`: Per-connection realtime buffer (default: 64)
    /// - `CLINIC_STORE_BACKEND`: "memory" or "postgres" (default: memory)
    /// - `CLINIC_RUN_MIGRATIONS`: "true" or "false" (default: true)
    pub fn from_env() -> ApiResult<Self> {
        let defaults = Self::default();

        let bind_host = std::env::var("CLINIC_API_BIND").unwrap_or(defaults.bind_host);

        let port_str = std::env::var("PORT")
            .ok()
            .or_else(|| std::env::var("CLINIC_API_PORT").ok());
        let port = match port_str {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", raw)))?,
            None => defaults.port,
        };

        let base_path = std::env::var("CLINIC_BASE_PATH")
            .ok()
            .map(|s| normalize_base_path(&s))
            .unwrap_or(defaults.base_path);

        let cors_origins = std::env::var("CLINIC_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("CLINIC_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        let cors_max_age_secs = std::env::var("CLINIC_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let ws_buffer = std::env::var("CLINIC_WS_BUFFER")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.ws_buffer);

        let store_backend = match std::env::var("CLINIC_STORE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.store_backend,
        };

        let run_migrations = std::env::var("CLINIC_RUN_MIGRATIONS")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.run_migrations);

        Ok(Self {
            bind_host,
            port,
            base_path,
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            ws_buffer,
            store_backend,
            run_migrations,
        })
    }

    /// Socket address to listen on.
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.clinic.example
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern))
                        || origin_domain == pattern;
                }
            }
            false
        })
    }
}

/// Check if running in a production environment.
pub fn is_production_environment() -> bool {
    std::env::var("CLINIC_ENVIRONMENT")
        .map(|e| matches!(e.to_lowercase().as_str(), "production" | "prod"))
        .unwrap_or(false)
}

/// `clinic-crm-api/` -> `/clinic-crm-api`; empty or `/` mounts at the root.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
