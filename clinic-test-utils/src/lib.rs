//! Clinic Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for queue types
//! - Fixtures for common queue scenarios
//! - Assertions for queue ordering invariants

// Re-export the in-memory store from its source crate
pub use clinic_storage::InMemoryQueueStore;

// Re-export core types for convenience
pub use clinic_core::{
    new_entity_id, DoctorId, PatientId, Priority, QueueCounter, QueueEntry, QueueEntryId,
    QueueStatus, Timestamp,
};

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate an arbitrary UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![Just(Priority::Emergency), Just(Priority::Normal)]
    }

    pub fn arb_status() -> impl Strategy<Value = QueueStatus> {
        prop_oneof![
            Just(QueueStatus::Waiting),
            Just(QueueStatus::InProgress),
            Just(QueueStatus::Completed),
            Just(QueueStatus::Skipped),
        ]
    }

    /// Generate a timestamp within a realistic range (2020-2030).
    fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// Priorities for a batch of arrivals, one per patient, in arrival order.
    pub fn arb_arrivals(max: usize) -> impl Strategy<Value = Vec<Priority>> {
        prop::collection::vec(arb_priority(), 1..=max)
    }

    /// A WAITING entry for the given doctor with arbitrary token and priority.
    pub fn arb_waiting_entry(doctor_id: DoctorId) -> impl Strategy<Value = QueueEntry> {
        (arb_uuid(), 1i64..10_000, arb_priority(), arb_timestamp()).prop_map(
            move |(patient_id, token, priority, created_at)| {
                QueueEntry::waiting(doctor_id, patient_id, token, priority, None, created_at)
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// A WAITING entry created now.
    pub fn waiting_entry(doctor_id: DoctorId, token_number: i64, priority: Priority) -> QueueEntry {
        QueueEntry::waiting(
            doctor_id,
            new_entity_id(),
            token_number,
            priority,
            None,
            chrono::Utc::now(),
        )
    }

    /// `n` distinct patient ids.
    pub fn patients(n: usize) -> Vec<PatientId> {
        (0..n).map(|_| new_entity_id()).collect()
    }

    /// An empty in-memory store behind an `Arc`.
    pub fn memory_store() -> std::sync::Arc<InMemoryQueueStore> {
        std::sync::Arc::new(InMemoryQueueStore::new())
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert entries are in serving order (EMERGENCY first, then lowest token).
    pub fn assert_queue_ordered(entries: &[QueueEntry]) {
        for pair in entries.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                (a.priority.rank(), a.token_number) <= (b.priority.rank(), b.token_number),
                "queue out of order: token {} ({}) before token {} ({})",
                a.token_number,
                a.priority,
                b.token_number,
                b.priority
            );
        }
    }

    /// Assert entries are in history order (latest completion first).
    pub fn assert_history_ordered(entries: &[QueueEntry]) {
        for pair in entries.windows(2) {
            assert!(
                pair[0].completed_at >= pair[1].completed_at,
                "history out of order: {:?} before {:?}",
                pair[0].completed_at,
                pair[1].completed_at
            );
        }
    }
}
