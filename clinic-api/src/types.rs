//! Request and Response Types for the Clinic API
//!
//! Wire DTOs only. Identifiers arrive as strings so the handlers can answer
//! malformed ids with the fixed messages clients already display.

use serde::{Deserialize, Serialize};

use crate::extractors::InvalidBodyMessage;

// ============================================================================
// RESPONSE ENVELOPE
// ============================================================================

/// Success envelope: `{"success": true, "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

// ============================================================================
// QUEUE REQUESTS
// ============================================================================

/// Request to add a patient to the caller's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    /// Patient UUID
    pub patient_id: String,
    /// `EMERGENCY` or `NORMAL` (default)
    #[serde(default)]
    pub priority: Option<String>,
    /// Optional appointment UUID
    #[serde(default)]
    pub appointment_id: Option<String>,
}

impl InvalidBodyMessage for EnqueueRequest {
    const INVALID_BODY: &'static str = "Invalid patient ID format";
}

/// Operator status overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateStatusRequest {
    /// `WAITING`, `IN_PROGRESS`, `COMPLETED` or `SKIPPED`
    pub status: String,
}

impl InvalidBodyMessage for UpdateStatusRequest {
    const INVALID_BODY: &'static str = "Invalid queue status";
}

/// Query parameters for GET /queue/history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct HistoryQuery {
    /// Maximum number of entries (1-500). All history when omitted.
    pub limit: Option<String>,
}
