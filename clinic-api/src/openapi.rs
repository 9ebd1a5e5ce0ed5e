//! OpenAPI Specification for the Clinic Queue API
//!
//! Queue paths are listed relative to the configured base path
//! (`/clinic-crm-api` by default); probes and metrics sit at the root.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::routes::{health, queue};
use crate::types::{EnqueueRequest, UpdateStatusRequest};

use clinic_core::{Priority, QueueCounter, QueueEntry, QueueStatus};

/// OpenAPI document for the clinic queue API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Clinic Queue API",
        version = "0.2.0",
        description = "Per-doctor patient queues with token numbering, triage ordering and realtime updates",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Queue", description = "Enqueue, call, skip and complete patients"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        queue::enqueue,
        queue::list_queue,
        queue::call_next,
        queue::complete,
        queue::skip,
        queue::update_status,
        queue::history,
        queue::get_counter,
        queue::reset_counter,
        health::ping,
        health::liveness,
        health::readiness,
        crate::telemetry::metrics::metrics_handler,
    ),
    components(
        schemas(
            QueueEntry,
            QueueCounter,
            QueueStatus,
            Priority,
            EnqueueRequest,
            UpdateStatusRequest,
            ApiError,
            ErrorCode,
            health::HealthResponse,
            health::HealthStatus,
            health::HealthDetails,
            health::ComponentHealth,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the JWT bearer scheme referenced by the queue paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("JWT issued by the clinic auth service"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();
        assert_eq!(openapi.info.title, "Clinic Queue API");

        let components = openapi
            .components
            .as_ref()
            .ok_or_else(|| "OpenAPI components missing".to_string())?;
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.schemas.contains_key("QueueEntry"));
        Ok(())
    }

    #[test]
    fn test_openapi_paths_exist() {
        let openapi = ApiDoc::openapi();
        for path in [
            "/queue",
            "/queue/call-next",
            "/queue/{id}/complete",
            "/queue/{id}/skip",
            "/queue/{id}/status",
            "/queue/history",
            "/queue/counter",
            "/queue/counter/reset",
            "/health/ready",
            "/metrics",
        ] {
            assert!(openapi.paths.paths.contains_key(path), "missing {}", path);
        }
    }

    #[test]
    fn test_entity_ids_and_timestamps_render_as_strings() -> Result<(), String> {
        let json: serde_json::Value = serde_json::to_value(ApiDoc::openapi())
            .map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;
        let schemas = &json["components"]["schemas"];

        let entry = &schemas["QueueEntry"]["properties"];
        assert_eq!(entry["id"]["format"], "uuid");
        assert_eq!(entry["patientId"]["format"], "uuid");
        assert_eq!(entry["createdAt"]["format"], "date-time");
        assert_eq!(entry["calledAt"]["format"], "date-time");

        let counter = &schemas["QueueCounter"]["properties"];
        assert_eq!(counter["doctorId"]["format"], "uuid");
        assert_eq!(counter["lastResetAt"]["format"], "date-time");
        Ok(())
    }

    #[test]
    fn test_openapi_json_serialization() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;
        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|e| format!("Generated JSON invalid: {}", e))?;
        assert!(json.contains("\"bearer_auth\""));
        Ok(())
    }
}
