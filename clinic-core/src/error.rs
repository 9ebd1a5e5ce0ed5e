//! Error types for queue operations

use crate::identity::{DoctorId, EntityId, PatientId};
use thiserror::Error;

/// Entity kinds referenced by storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    QueueEntry,
    QueueCounter,
}

/// Storage layer errors.
///
/// Callers branch on the variant, never on the rendered message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Active queue entry already exists for patient {patient_id} with doctor {doctor_id}")]
    DuplicateActiveEntry {
        doctor_id: DoctorId,
        patient_id: PatientId,
    },

    #[error("Entity not found: {entity:?} with id {id}")]
    NotFound { entity: EntityKind, id: EntityId },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Query failed: {reason}")]
    Query { reason: String },

    #[error("Stored value could not be decoded: {reason}")]
    Corrupt { reason: String },
}

impl StorageError {
    /// Whether the failure is a uniqueness violation on the active-entry index.
    pub fn is_duplicate_active(&self) -> bool {
        matches!(self, StorageError::DuplicateActiveEntry { .. })
    }
}

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Queue engine error taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    /// Duplicate active entry or a lost insert race.
    #[error("{0}")]
    Conflict(String),

    /// No entry matched the predicate.
    #[error("{0}")]
    NotFound(String),

    /// Cross-doctor access.
    #[error("{0}")]
    Authorization(String),

    /// The backing store failed. Not retried.
    #[error("Upstream store failure: {0}")]
    Upstream(StorageError),
}

impl QueueError {
    pub const PATIENT_ALREADY_QUEUED: &'static str = "Patient already exists in active queue";
    pub const NO_WAITING_PATIENTS: &'static str = "No waiting patients in queue";
    pub const ENTRY_NOT_FOUND: &'static str = "Queue entry not found or already processed";
    pub const FOREIGN_ENTRY: &'static str = "Queue entry belongs to another doctor";

    pub fn patient_already_queued() -> Self {
        QueueError::Conflict(Self::PATIENT_ALREADY_QUEUED.to_string())
    }

    pub fn entry_not_found() -> Self {
        QueueError::NotFound(Self::ENTRY_NOT_FOUND.to_string())
    }

    pub fn no_waiting_patients() -> Self {
        QueueError::NotFound(Self::NO_WAITING_PATIENTS.to_string())
    }

    pub fn foreign_entry() -> Self {
        QueueError::Authorization(Self::FOREIGN_ENTRY.to_string())
    }
}

impl From<StorageError> for QueueError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateActiveEntry { .. } => QueueError::patient_already_queued(),
            StorageError::NotFound { .. } => QueueError::entry_not_found(),
            other => QueueError::Upstream(other),
        }
    }
}

/// Result type for queue engine operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::new_entity_id;

    #[test]
    fn test_duplicate_maps_to_conflict_by_kind() {
        let err = StorageError::DuplicateActiveEntry {
            doctor_id: new_entity_id(),
            patient_id: new_entity_id(),
        };
        assert!(err.is_duplicate_active());
        assert_eq!(
            QueueError::from(err),
            QueueError::Conflict("Patient already exists in active queue".to_string())
        );
    }

    #[test]
    fn test_unavailable_maps_to_upstream() {
        let err = StorageError::Unavailable {
            reason: "duplicate connection slot".to_string(),
        };
        assert!(!err.is_duplicate_active());
        assert!(matches!(QueueError::from(err), QueueError::Upstream(_)));
    }

    #[test]
    fn test_not_found_maps_to_entry_not_found() {
        let err = StorageError::NotFound {
            entity: EntityKind::QueueEntry,
            id: new_entity_id(),
        };
        assert_eq!(QueueError::from(err), QueueError::entry_not_found());
    }
}
