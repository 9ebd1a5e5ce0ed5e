//! Queue entities and ordering rules.

use crate::enums::{Priority, QueueStatus};
use crate::identity::{new_entity_id, AppointmentId, DoctorId, PatientId, QueueEntryId, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ============================================================================
// QUEUE ENTRY
// ============================================================================

/// A patient's place in a doctor's queue.
///
/// Entries are never deleted; COMPLETED and SKIPPED entries remain as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub id: QueueEntryId,
    pub token_number: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub patient_id: PatientId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub doctor_id: DoctorId,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub appointment_id: Option<AppointmentId>,
    pub status: QueueStatus,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub called_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub completed_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl QueueEntry {
    /// Build a fresh WAITING entry for an issued token.
    pub fn waiting(
        doctor_id: DoctorId,
        patient_id: PatientId,
        token_number: i64,
        priority: Priority,
        appointment_id: Option<AppointmentId>,
        now: Timestamp,
    ) -> Self {
        Self {
            id: new_entity_id(),
            token_number,
            patient_id,
            doctor_id,
            priority,
            appointment_id,
            status: QueueStatus::Waiting,
            called_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move along a state machine edge, stamping timestamps.
    ///
    /// Callers are responsible for checking the expected current status; this
    /// only records the effect of the move.
    pub fn apply_transition(&mut self, next: QueueStatus, now: Timestamp) {
        match next {
            QueueStatus::InProgress => self.called_at = Some(now),
            QueueStatus::Completed | QueueStatus::Skipped => self.completed_at = Some(now),
            QueueStatus::Waiting => {}
        }
        self.status = next;
        self.updated_at = now;
    }

    /// Operator overwrite. Resets timestamps that no longer describe the entry.
    pub fn apply_override(&mut self, next: QueueStatus, now: Timestamp) {
        match next {
            QueueStatus::Waiting => {
                self.called_at = None;
                self.completed_at = None;
            }
            QueueStatus::InProgress => {
                self.called_at = Some(now);
                self.completed_at = None;
            }
            QueueStatus::Completed | QueueStatus::Skipped => {
                self.completed_at = Some(now);
            }
        }
        self.status = next;
        self.updated_at = now;
    }

    /// Whether the entry is still visible in the active list given the
    /// doctor's archival boundary (last counter reset).
    pub fn is_listed_active(&self, skipped_since: Option<Timestamp>) -> bool {
        match self.status {
            QueueStatus::Waiting | QueueStatus::InProgress => true,
            QueueStatus::Completed => false,
            QueueStatus::Skipped => match (skipped_since, self.completed_at) {
                (Some(boundary), Some(done)) => done >= boundary,
                _ => true,
            },
        }
    }
}

// ============================================================================
// QUEUE COUNTER
// ============================================================================

/// Per-doctor token sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct QueueCounter {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub doctor_id: DoctorId,
    pub current_token_number: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_reset_at: Timestamp,
}

impl QueueCounter {
    /// A counter that has never issued a token.
    pub fn fresh(doctor_id: DoctorId, now: Timestamp) -> Self {
        Self {
            doctor_id,
            current_token_number: 0,
            last_reset_at: now,
        }
    }
}

// ============================================================================
// ORDERING
// ============================================================================

/// Serving order: EMERGENCY before NORMAL, then lowest token first.
pub fn queue_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    a.priority
        .rank()
        .cmp(&b.priority.rank())
        .then(a.token_number.cmp(&b.token_number))
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// History order: most recently finished first.
pub fn history_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.completed_at
        .cmp(&a.completed_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Sort entries into serving order in place.
pub fn sort_queue(entries: &mut [QueueEntry]) {
    entries.sort_by(queue_order);
}
