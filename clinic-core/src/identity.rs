//! Identity types for queue entities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Owning doctor of a queue and of its token counter.
pub type DoctorId = EntityId;

/// Patient record referenced (not owned) by queue entries.
pub type PatientId = EntityId;

/// Appointment record optionally linked to a queue entry.
pub type AppointmentId = EntityId;

/// Store-generated queue entry identifier.
pub type QueueEntryId = EntityId;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Parse an identifier from untrusted input.
///
/// Accepts only the hyphenated 36-character form so that ids echoed back in
/// room names and URLs stay canonical.
pub fn parse_entity_id(raw: &str) -> Option<EntityId> {
    let trimmed = raw.trim();
    if trimmed.len() != 36 {
        return None;
    }
    Uuid::parse_str(trimmed).ok()
}
