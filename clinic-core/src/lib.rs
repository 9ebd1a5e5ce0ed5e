//! Clinic Core - Queue Entity Types
//!
//! Pure data structures shared by the store, the engine and the API layer.
//! The only behavior here is the state machine and ordering rules every
//! store implementation must agree on.

pub mod enums;
pub mod error;
pub mod identity;
pub mod queue;

pub use enums::{Priority, PriorityParseError, QueueStatus, QueueStatusParseError};
pub use error::{EntityKind, QueueError, QueueResult, StorageError, StorageResult};
pub use identity::{
    new_entity_id, parse_entity_id, AppointmentId, DoctorId, EntityId, PatientId, QueueEntryId,
    Timestamp,
};
pub use queue::{history_order, queue_order, sort_queue, QueueCounter, QueueEntry};
