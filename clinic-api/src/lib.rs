//! Clinic API - REST/WebSocket layer for the patient queue
//!
//! Exposes per-doctor queues over HTTP (Axum) and streams queue snapshots
//! to connected front-desk screens over WebSocket. The [`QueueEngine`] owns
//! the state machine; the [`Broadcaster`] is injected into it as a
//! [`QueuePublisher`] at startup.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod extractors;
pub mod jobs;
pub mod middleware;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod services;
pub mod telemetry;
#[cfg(test)]
mod test_env;
pub mod types;
pub mod ws;

// Re-export commonly used types
pub use auth::{
    authenticate, generate_jwt_token, validate_jwt_token, AuthConfig, AuthContext, Claims,
    UserRole,
};
pub use config::{ApiConfig, StoreBackend};
pub use db::{DbConfig, PgQueueStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use events::{ClientMessage, ControlMessage, QueueAction, QueueEvent, QueueEventKind};
pub use middleware::{auth_middleware, AuthExtractor, AuthMiddlewareState};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::SecureRouterBuilder;
pub use services::{QueueEngine, QueuePublisher, TokenCounter};
pub use telemetry::QueueMetrics;
pub use types::*;
pub use ws::{Broadcaster, WsState};
