//! Queue REST API Routes
//!
//! Every handler acts on the caller's own queue: the doctor scope is the
//! authenticated user's id. Path and body identifiers arrive as strings and
//! are parsed here so malformed input gets the fixed client-facing messages.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use clinic_core::{parse_entity_id, EntityId, Priority, QueueError, QueueStatus};
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    extractors::JsonBody,
    middleware::AuthExtractor,
    services::{QueueEngine, HISTORY_LIMIT_MAX},
    types::{ApiResponse, EnqueueRequest, HistoryQuery, UpdateStatusRequest},
};

// ============================================================================
// STATE
// ============================================================================

/// Shared state for queue routes.
#[derive(Clone)]
pub struct QueueState {
    pub engine: QueueEngine,
}

impl QueueState {
    pub fn new(engine: QueueEngine) -> Self {
        Self { engine }
    }
}

// ============================================================================
// INPUT PARSING
// ============================================================================

fn parse_id(raw: &str, message: &'static str) -> ApiResult<EntityId> {
    parse_entity_id(raw).ok_or_else(|| ApiError::invalid_format(message))
}

fn parse_priority(raw: Option<&str>) -> ApiResult<Priority> {
    match raw {
        None => Ok(Priority::default()),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::invalid_format("Invalid priority")),
    }
}

fn parse_status(raw: &str) -> ApiResult<QueueStatus> {
    raw.parse()
        .map_err(|_| ApiError::invalid_format("Invalid queue status"))
}

/// `limit` must be a positive integer; values above the page cap are clamped
/// by the engine.
fn parse_limit(raw: Option<&str>) -> ApiResult<Option<usize>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(Some(limit)),
        _ => Err(ApiError::invalid_range("limit", 1, HISTORY_LIMIT_MAX)),
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /queue - Add a patient to the caller's queue
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/queue",
    tag = "Queue",
    request_body = EnqueueRequest,
    responses(
        (status = 201, description = "Patient enqueued", body = ApiResponse<clinic_core::QueueEntry>),
        (status = 400, description = "Invalid patient id, appointment id or priority", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 409, description = "Patient already exists in active queue", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn enqueue(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
    JsonBody(req): JsonBody<EnqueueRequest>,
) -> ApiResult<impl IntoResponse> {
    let patient_id = parse_id(&req.patient_id, "Invalid patient ID format")?;
    let appointment_id = req
        .appointment_id
        .as_deref()
        .map(|raw| parse_id(raw, "Invalid appointment ID format"))
        .transpose()?;
    let priority = parse_priority(req.priority.as_deref())?;

    let entry = state
        .engine
        .enqueue(auth.doctor_id(), patient_id, priority, appointment_id)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(entry))))
}

/// GET /queue - Active entries in serving order
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/queue",
    tag = "Queue",
    responses(
        (status = 200, description = "Active queue", body = ApiResponse<Vec<clinic_core::QueueEntry>>),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn list_queue(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let queue = state.engine.list_active(auth.doctor_id()).await?;
    Ok(Json(ApiResponse::ok(queue)))
}

/// POST /queue/call-next - Claim the next waiting patient
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/queue/call-next",
    tag = "Queue",
    responses(
        (status = 200, description = "Patient called", body = ApiResponse<clinic_core::QueueEntry>),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "No waiting patients in queue", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn call_next(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let entry = state
        .engine
        .call_next(auth.doctor_id())
        .await?
        .ok_or_else(QueueError::no_waiting_patients)?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// POST /queue/{id}/complete - Finish an in-progress consultation
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/queue/{id}/complete",
    tag = "Queue",
    params(("id" = String, Path, description = "Queue entry ID")),
    responses(
        (status = 200, description = "Entry completed", body = ApiResponse<clinic_core::QueueEntry>),
        (status = 400, description = "Invalid queue ID format", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Queue entry not found or already processed", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn complete(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "Invalid queue ID format")?;
    let entry = state
        .engine
        .complete(id, auth.doctor_id())
        .await?
        .ok_or_else(QueueError::entry_not_found)?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// POST /queue/{id}/skip - Skip a waiting patient
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/queue/{id}/skip",
    tag = "Queue",
    params(("id" = String, Path, description = "Queue entry ID")),
    responses(
        (status = 200, description = "Entry skipped", body = ApiResponse<clinic_core::QueueEntry>),
        (status = 400, description = "Invalid queue ID format", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Queue entry not found or already processed", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn skip(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "Invalid queue ID format")?;
    let entry = state
        .engine
        .skip(id, auth.doctor_id())
        .await?
        .ok_or_else(QueueError::entry_not_found)?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// PATCH /queue/{id}/status - Operator status overwrite
#[cfg_attr(feature = "openapi", utoipa::path(
    patch,
    path = "/queue/{id}/status",
    tag = "Queue",
    params(("id" = String, Path, description = "Queue entry ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<clinic_core::QueueEntry>),
        (status = 400, description = "Invalid queue ID or status", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Entry belongs to another doctor", body = ApiError),
        (status = 404, description = "Queue entry not found", body = ApiError),
        (status = 409, description = "Patient already exists in active queue", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn update_status(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, "Invalid queue ID format")?;
    let status = parse_status(&req.status)?;
    let entry = state
        .engine
        .update_status(id, auth.doctor_id(), status)
        .await?;
    Ok(Json(ApiResponse::ok(entry)))
}

/// GET /queue/history - Finished entries, latest first
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/queue/history",
    tag = "Queue",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Queue history", body = ApiResponse<Vec<clinic_core::QueueEntry>>),
        (status = 400, description = "Invalid limit", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn history(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
    Query(params): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = parse_limit(params.limit.as_deref())?;
    let entries = state.engine.list_history(auth.doctor_id(), limit).await?;
    Ok(Json(ApiResponse::ok(entries)))
}

/// GET /queue/counter - Current token counter
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/queue/counter",
    tag = "Queue",
    responses(
        (status = 200, description = "Token counter", body = ApiResponse<clinic_core::QueueCounter>),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn get_counter(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let counter = state.engine.counter(auth.doctor_id()).await?;
    Ok(Json(ApiResponse::ok(counter)))
}

/// POST /queue/counter/reset - Restart token numbering at 1
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/queue/counter/reset",
    tag = "Queue",
    responses(
        (status = 200, description = "Counter reset", body = ApiResponse<clinic_core::QueueCounter>),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn reset_counter(
    State(state): State<Arc<QueueState>>,
    AuthExtractor(auth): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let counter = state.engine.reset_counter(auth.doctor_id()).await?;
    Ok(Json(ApiResponse::ok(counter)))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the queue router. Auth is layered on by the caller.
pub fn create_router(engine: QueueEngine) -> Router {
    let state = Arc::new(QueueState::new(engine));

    Router::new()
        .route("/", post(enqueue).get(list_queue))
        .route("/call-next", post(call_next))
        .route("/history", get(history))
        .route("/counter", get(get_counter))
        .route("/counter/reset", post(reset_counter))
        .route("/:id/complete", post(complete))
        .route("/:id/skip", post(skip))
        .route("/:id/status", patch(update_status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_parse_id_messages() {
        let err = parse_id("42", "Invalid queue ID format").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
        assert_eq!(err.message, "Invalid queue ID format");

        let id = clinic_core::new_entity_id();
        assert_eq!(parse_id(&id.to_string(), "unused").ok(), Some(id));
    }

    #[test]
    fn test_parse_priority_defaults_to_normal() {
        assert_eq!(parse_priority(None).ok(), Some(Priority::Normal));
        assert_eq!(parse_priority(Some("EMERGENCY")).ok(), Some(Priority::Emergency));

        let err = parse_priority(Some("urgent")).unwrap_err();
        assert_eq!(err.message, "Invalid priority");
    }

    #[test]
    fn test_parse_status_rejects_unknown() {
        assert_eq!(parse_status("SKIPPED").ok(), Some(QueueStatus::Skipped));
        let err = parse_status("CANCELLED").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid queue status");
    }

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit(None).ok(), Some(None));
        assert_eq!(parse_limit(Some("25")).ok(), Some(Some(25)));
        assert_eq!(parse_limit(Some("9000")).ok(), Some(Some(9000)));

        for bad in ["0", "-1", "ten", ""] {
            let err = parse_limit(Some(bad)).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidRange, "limit {:?}", bad);
        }
    }
}
