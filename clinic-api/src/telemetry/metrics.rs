//! Prometheus Metrics Definitions
//!
//! Defines the clinic queue metrics with appropriate labels and types.
//! Each `QueueMetrics` owns its own `Registry`, so several instances (one per
//! test, one per server) never collide on registration.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Container for all clinic queue metrics.
#[derive(Clone)]
pub struct QueueMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Queue engine operations - labels: operation, outcome
    pub queue_operations_total: CounterVec,

    /// Tokens handed out by the counter
    pub tokens_issued_total: IntCounter,

    /// Operator status overwrites - labels: bypass ("true" when the move is
    /// not a legal state machine edge)
    pub status_overrides_total: CounterVec,

    /// Snapshot reads that failed after a successful mutation
    pub snapshot_failures_total: IntCounter,

    /// Events handed to the broadcaster
    pub broadcast_publishes_total: IntCounter,

    /// Per-connection deliveries - labels: result (delivered, dropped, closed)
    pub broadcast_deliveries_total: CounterVec,

    /// Current active WebSocket connections
    pub websocket_connections: Gauge,
}

fn register<C>(registry: &Registry, name: &str, collector: C) -> ApiResult<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| ApiError::internal_error(format!("Failed to register {}: {}", name, e)))?;
    Ok(collector)
}

fn metric_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to create {}: {}", name, e))
}

impl QueueMetrics {
    /// Create all metrics and register them with a fresh registry.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("clinic_http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .map_err(|e| metric_error("http_requests_total", e))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "clinic_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )
        .map_err(|e| metric_error("http_request_duration_seconds", e))?;

        let queue_operations_total = CounterVec::new(
            Opts::new("clinic_queue_operations_total", "Queue engine operations"),
            &["operation", "outcome"],
        )
        .map_err(|e| metric_error("queue_operations_total", e))?;

        let tokens_issued_total = IntCounter::new(
            "clinic_queue_tokens_issued_total",
            "Tokens issued by the per-doctor counters",
        )
        .map_err(|e| metric_error("tokens_issued_total", e))?;

        let status_overrides_total = CounterVec::new(
            Opts::new(
                "clinic_queue_status_overrides_total",
                "Operator status overwrites",
            ),
            &["bypass"],
        )
        .map_err(|e| metric_error("status_overrides_total", e))?;

        let snapshot_failures_total = IntCounter::new(
            "clinic_queue_snapshot_failures_total",
            "Active queue reads that failed after a mutation",
        )
        .map_err(|e| metric_error("snapshot_failures_total", e))?;

        let broadcast_publishes_total = IntCounter::new(
            "clinic_broadcast_publishes_total",
            "Queue events handed to the broadcaster",
        )
        .map_err(|e| metric_error("broadcast_publishes_total", e))?;

        let broadcast_deliveries_total = CounterVec::new(
            Opts::new(
                "clinic_broadcast_deliveries_total",
                "Per-connection event deliveries",
            ),
            &["result"],
        )
        .map_err(|e| metric_error("broadcast_deliveries_total", e))?;

        let websocket_connections = Gauge::new(
            "clinic_websocket_connections",
            "Current number of active WebSocket connections",
        )
        .map_err(|e| metric_error("websocket_connections", e))?;

        Ok(Self {
            http_requests_total: register(&registry, "http_requests_total", http_requests_total)?,
            http_request_duration_seconds: register(
                &registry,
                "http_request_duration_seconds",
                http_request_duration_seconds,
            )?,
            queue_operations_total: register(
                &registry,
                "queue_operations_total",
                queue_operations_total,
            )?,
            tokens_issued_total: register(&registry, "tokens_issued_total", tokens_issued_total)?,
            status_overrides_total: register(
                &registry,
                "status_overrides_total",
                status_overrides_total,
            )?,
            snapshot_failures_total: register(
                &registry,
                "snapshot_failures_total",
                snapshot_failures_total,
            )?,
            broadcast_publishes_total: register(
                &registry,
                "broadcast_publishes_total",
                broadcast_publishes_total,
            )?,
            broadcast_deliveries_total: register(
                &registry,
                "broadcast_deliveries_total",
                broadcast_deliveries_total,
            )?,
            websocket_connections: register(
                &registry,
                "websocket_connections",
                websocket_connections,
            )?,
            registry,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a queue engine operation outcome.
    pub fn record_queue_operation(&self, operation: &str, outcome: &str) {
        self.queue_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn record_token_issued(&self) {
        self.tokens_issued_total.inc();
    }

    pub fn record_status_override(&self, bypass: bool) {
        let label = if bypass { "true" } else { "false" };
        self.status_overrides_total.with_label_values(&[label]).inc();
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures_total.inc();
    }

    pub fn record_publish(&self) {
        self.broadcast_publishes_total.inc();
    }

    /// Record one per-connection delivery attempt.
    pub fn record_delivery(&self, result: &str) {
        self.broadcast_deliveries_total
            .with_label_values(&[result])
            .inc();
    }

    /// Increment WebSocket connection count.
    pub fn ws_connected(&self) {
        self.websocket_connections.inc();
    }

    /// Decrement WebSocket connection count.
    pub fn ws_disconnected(&self) {
        self.websocket_connections.dec();
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode(&self) -> ApiResult<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
))]
pub async fn metrics_handler(State(metrics): State<Arc<QueueMetrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message.into_bytes(),
            )
        }
    }
}
