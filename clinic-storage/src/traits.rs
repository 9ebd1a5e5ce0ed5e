//! Async store traits for the queue and its token counters.
//!
//! Every method is a single atomic round trip against the backing store.
//! Correctness across concurrent requests (and across processes sharing the
//! same database) rests on these primitives, not on in-process locks.

use ::async_trait::async_trait;
use clinic_core::{
    DoctorId, PatientId, QueueCounter, QueueEntry, QueueEntryId, QueueStatus, StorageResult,
    Timestamp,
};

/// Per-doctor monotonic token counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment and return the new value.
    ///
    /// Creates the counter at 0 on first use, so the first value is 1.
    async fn counter_increment(&self, doctor_id: DoctorId) -> StorageResult<i64>;

    /// Set the counter back to 0 and stamp `last_reset_at`.
    async fn counter_reset(&self, doctor_id: DoctorId, now: Timestamp)
        -> StorageResult<QueueCounter>;

    /// Read a counter without creating it.
    async fn counter_get(&self, doctor_id: DoctorId) -> StorageResult<Option<QueueCounter>>;

    /// Counters whose last reset precedes `before`.
    async fn counter_list_reset_due(&self, before: Timestamp) -> StorageResult<Vec<QueueCounter>>;
}

/// Durable collection of queue entries.
#[async_trait]
pub trait QueueStore: Send + Sync {
    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a new entry.
    ///
    /// Fails with `StorageError::DuplicateActiveEntry` when the patient
    /// already holds a WAITING or IN_PROGRESS entry for the same doctor.
    async fn entry_insert(&self, entry: &QueueEntry) -> StorageResult<()>;

    /// Select the best WAITING entry for the doctor (EMERGENCY first, then
    /// lowest token) and move it to IN_PROGRESS in one indivisible step.
    ///
    /// Returns `None` when nothing is waiting.
    async fn entry_claim_next(
        &self,
        doctor_id: DoctorId,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>>;

    /// Conditional update: apply `next` only if the entry exists, belongs to
    /// `doctor_id` and is currently `expected`.
    ///
    /// Returns `None` when the predicate does not hold.
    async fn entry_transition(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        expected: QueueStatus,
        next: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>>;

    /// Unconditional status overwrite, still scoped to the owning doctor and
    /// still subject to the active-entry uniqueness constraint.
    async fn entry_overwrite_status(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        status: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>>;

    // ========================================================================
    // READS
    // ========================================================================

    /// Get an entry by id.
    async fn entry_get(&self, id: QueueEntryId) -> StorageResult<Option<QueueEntry>>;

    /// The patient's current WAITING/IN_PROGRESS entry with this doctor, if any.
    async fn entry_find_active(
        &self,
        doctor_id: DoctorId,
        patient_id: PatientId,
    ) -> StorageResult<Option<QueueEntry>>;

    /// Non-COMPLETED entries in serving order.
    ///
    /// SKIPPED entries finished before `skipped_since` are treated as archived
    /// and left out.
    async fn entry_list_active(
        &self,
        doctor_id: DoctorId,
        skipped_since: Option<Timestamp>,
    ) -> StorageResult<Vec<QueueEntry>>;

    /// COMPLETED and SKIPPED entries, most recently finished first.
    async fn entry_list_history(
        &self,
        doctor_id: DoctorId,
        limit: Option<usize>,
    ) -> StorageResult<Vec<QueueEntry>>;

    /// Verify the store is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}
