//! REST API Routes Module
//!
//! Includes:
//! - Queue routes under the configured base path (auth required)
//! - The realtime WebSocket endpoint (authenticates during the handshake)
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics and the OpenAPI document
//! - CORS support for browser-based clients

pub mod health;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use clinic_storage::QueueStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::config::{is_production_environment, ApiConfig};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::services::QueueEngine;
use crate::telemetry::QueueMetrics;
use crate::ws::{ws_handler, Broadcaster, WsState};

pub use health::create_router as health_router;
pub use queue::create_router as queue_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
#[cfg(feature = "openapi")]
async fn openapi_json() -> impl axum::response::IntoResponse {
    use utoipa::OpenApi;
    axum::Json(crate::openapi::ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

/// Validate API configuration for production use.
fn validate_api_config_for_production(config: &ApiConfig) -> ApiResult<()> {
    if config.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set CLINIC_CORS_ORIGINS.",
        ));
    }
    if config.cors_origins.iter().any(|o| o == "*") {
        return Err(ApiError::invalid_input(
            "Wildcard CORS origin is not allowed in production.",
        ));
    }
    Ok(())
}

// ============================================================================
// SECURE ROUTER BUILDER
// ============================================================================

/// Builder for the complete application router.
///
/// Queue routes are wrapped in the auth middleware. The WebSocket endpoint
/// authenticates inside its handler so it can accept `?token=`. Probes,
/// metrics and the OpenAPI document are public.
pub struct SecureRouterBuilder {
    engine: QueueEngine,
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn QueueStore>,
    metrics: Arc<QueueMetrics>,
    api_config: ApiConfig,
    auth_state: AuthMiddlewareState,
}

impl SecureRouterBuilder {
    /// Create a new SecureRouterBuilder.
    ///
    /// In production this refuses a weak JWT secret and a missing CORS
    /// allow-list.
    pub fn new(
        engine: QueueEngine,
        broadcaster: Arc<Broadcaster>,
        store: Arc<dyn QueueStore>,
        metrics: Arc<QueueMetrics>,
        api_config: ApiConfig,
        auth_config: AuthConfig,
    ) -> ApiResult<Self> {
        auth_config.validate_for_production()?;
        if is_production_environment() {
            validate_api_config_for_production(&api_config)?;
        }

        Ok(Self {
            engine,
            broadcaster,
            store,
            metrics,
            api_config,
            auth_state: AuthMiddlewareState::new(auth_config),
        })
    }

    /// Build the complete router.
    ///
    /// # Middleware Order (outer to inner)
    /// 1. CORS (outermost) - handles preflight requests
    /// 2. Observability - request metrics and completion logs
    /// 3. Trace - tower-http request spans
    /// 4. Auth (innermost, only on the queue routes)
    pub fn build(self) -> Router {
        use crate::telemetry::{metrics_handler, observability_middleware};

        let base = self.api_config.base_path.as_str();

        let queue_routes = queue::create_router(self.engine.clone())
            .layer(from_fn_with_state(self.auth_state.clone(), auth_middleware));

        let ws_state = Arc::new(WsState {
            broadcaster: self.broadcaster.clone(),
            engine: self.engine.clone(),
            auth_config: self.auth_state.auth_config.clone(),
        });
        let ws_routes = Router::new()
            .route(&format!("{}/ws", base), get(ws_handler))
            .with_state(ws_state);

        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.metrics.clone());

        #[allow(unused_mut)]
        let mut router = Router::new()
            .nest(&format!("{}/queue", base), queue_routes)
            .merge(ws_routes)
            .nest("/health", health::create_router(self.store.clone()))
            .merge(metrics_routes);

        #[cfg(feature = "openapi")]
        {
            router = router.route("/openapi.json", get(openapi_json));
        }

        let cors = build_cors_layer(&self.api_config);

        router
            .layer(TraceLayer::new_for_http())
            .layer(from_fn_with_state(self.metrics, observability_middleware))
            .layer(cors)
    }
}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Build CORS layer from API configuration.
///
/// Empty origins allow any origin (dev mode). Otherwise only the listed
/// origins are accepted.
pub fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        cors = cors
            .allow_origin(Any)
            .allow_headers(Any)
            .expose_headers(Any);
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();

        cors = cors.allow_origin(origins);

        if config.cors_allow_credentials {
            cors = cors.allow_credentials(true);
        }
    }

    cors
}
