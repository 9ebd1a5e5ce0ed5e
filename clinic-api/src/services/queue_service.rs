//! Queue Engine
//!
//! State machine and ordering logic for per-doctor queues. Every mutation is
//! a single atomic store primitive; the engine keeps no mutable state of its
//! own, so any number of engines may share one store.
//!
//! After each successful mutation the engine reads the doctor's active queue
//! again and hands exactly one [`QueueEvent`] to the injected publisher.
//! Publishing is synchronous and never blocks; a failed snapshot read is
//! logged and counted but does not fail the mutation.

use chrono::Utc;
use clinic_core::{
    AppointmentId, DoctorId, PatientId, Priority, QueueCounter, QueueEntry, QueueEntryId,
    QueueError, QueueResult, QueueStatus,
};
use clinic_storage::QueueStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::{QueueAction, QueueEvent, QueueEventKind};
use crate::services::TokenCounter;
use crate::telemetry::QueueMetrics;

/// Upper bound for a single history page.
pub const HISTORY_LIMIT_MAX: usize = 500;

// ============================================================================
// PUBLISHER SEAM
// ============================================================================

/// Receives queue events after successful mutations.
///
/// Implementations must return promptly: the call sits on the request path.
pub trait QueuePublisher: Send + Sync {
    fn publish(&self, event: &QueueEvent);
}

// ============================================================================
// ENGINE
// ============================================================================

/// The queue engine, constructed once and shared by handlers and jobs.
#[derive(Clone)]
pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    counter: TokenCounter,
    publisher: Arc<dyn QueuePublisher>,
    metrics: Arc<QueueMetrics>,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        counter: TokenCounter,
        publisher: Arc<dyn QueuePublisher>,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        Self {
            store,
            counter,
            publisher,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Add a patient to the doctor's queue with the next token.
    ///
    /// Fails with a conflict when the patient already holds an active entry.
    /// A token consumed by a lost insert race is not reused.
    pub async fn enqueue(
        &self,
        doctor_id: DoctorId,
        patient_id: PatientId,
        priority: Priority,
        appointment_id: Option<AppointmentId>,
    ) -> QueueResult<QueueEntry> {
        let result = self
            .enqueue_inner(doctor_id, patient_id, priority, appointment_id)
            .await;
        self.observe("enqueue", &result);
        let entry = result?;

        self.announce(doctor_id, |queue| {
            QueueEvent::updated(doctor_id, queue, QueueAction::Enqueued).with_entry(entry.clone())
        })
        .await;
        Ok(entry)
    }

    async fn enqueue_inner(
        &self,
        doctor_id: DoctorId,
        patient_id: PatientId,
        priority: Priority,
        appointment_id: Option<AppointmentId>,
    ) -> QueueResult<QueueEntry> {
        if self
            .store
            .entry_find_active(doctor_id, patient_id)
            .await?
            .is_some()
        {
            debug!(doctor_id = %doctor_id, patient_id = %patient_id, "Patient already queued");
            return Err(QueueError::patient_already_queued());
        }

        let token = self.counter.next_token(doctor_id).await?;
        self.metrics.record_token_issued();

        let entry = QueueEntry::waiting(
            doctor_id,
            patient_id,
            token,
            priority,
            appointment_id,
            Utc::now(),
        );

        if let Err(err) = self.store.entry_insert(&entry).await {
            if err.is_duplicate_active() {
                warn!(
                    doctor_id = %doctor_id,
                    patient_id = %patient_id,
                    token = token,
                    "Lost enqueue race, token skipped"
                );
            }
            return Err(err.into());
        }

        info!(
            doctor_id = %doctor_id,
            entry_id = %entry.id,
            token = token,
            priority = %priority,
            "Patient enqueued"
        );
        Ok(entry)
    }

    /// Claim the best waiting entry (EMERGENCY first, then lowest token).
    ///
    /// `Ok(None)` means the queue has nobody waiting.
    pub async fn call_next(&self, doctor_id: DoctorId) -> QueueResult<Option<QueueEntry>> {
        let result = self
            .store
            .entry_claim_next(doctor_id, Utc::now())
            .await
            .map_err(QueueError::from);
        self.observe_optional("call_next", &result);

        let Some(entry) = result? else {
            return Ok(None);
        };

        info!(
            doctor_id = %doctor_id,
            entry_id = %entry.id,
            token = entry.token_number,
            "Patient called"
        );
        self.announce(doctor_id, |queue| {
            QueueEvent::new(QueueEventKind::PatientCalled, doctor_id, queue)
                .with_entry(entry.clone())
        })
        .await;
        Ok(Some(entry))
    }

    /// Skip a WAITING entry owned by the doctor.
    ///
    /// `Ok(None)` covers a missing id, another doctor's entry, and an entry
    /// that is no longer waiting.
    pub async fn skip(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
    ) -> QueueResult<Option<QueueEntry>> {
        let result = self
            .transition("skip", id, doctor_id, QueueStatus::Waiting, QueueStatus::Skipped)
            .await;
        let Some(entry) = result? else {
            return Ok(None);
        };

        self.announce(doctor_id, |queue| {
            QueueEvent::new(QueueEventKind::PatientSkipped, doctor_id, queue)
                .with_entry(entry.clone())
        })
        .await;
        Ok(Some(entry))
    }

    /// Complete an IN_PROGRESS entry owned by the doctor.
    pub async fn complete(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
    ) -> QueueResult<Option<QueueEntry>> {
        let result = self
            .transition(
                "complete",
                id,
                doctor_id,
                QueueStatus::InProgress,
                QueueStatus::Completed,
            )
            .await;
        let Some(entry) = result? else {
            return Ok(None);
        };

        self.announce(doctor_id, |queue| {
            QueueEvent::updated(doctor_id, queue, QueueAction::Completed).with_entry(entry.clone())
        })
        .await;
        Ok(Some(entry))
    }

    async fn transition(
        &self,
        operation: &'static str,
        id: QueueEntryId,
        doctor_id: DoctorId,
        expected: QueueStatus,
        next: QueueStatus,
    ) -> QueueResult<Option<QueueEntry>> {
        let result = self
            .store
            .entry_transition(id, doctor_id, expected, next, Utc::now())
            .await
            .map_err(QueueError::from);
        self.observe_optional(operation, &result);

        match &result {
            Ok(Some(entry)) => info!(
                doctor_id = %doctor_id,
                entry_id = %entry.id,
                status = %entry.status,
                "Queue entry transitioned"
            ),
            Ok(None) => debug!(
                doctor_id = %doctor_id,
                entry_id = %id,
                expected = %expected,
                "Transition predicate did not match"
            ),
            Err(_) => {}
        }
        result
    }

    /// Operator overwrite of an entry's status.
    ///
    /// Ignores the state machine but not ownership: another doctor's entry
    /// is refused with an authorization error, a missing id with not found,
    /// and an overwrite that would create a second active entry for the
    /// patient with a conflict.
    pub async fn update_status(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        status: QueueStatus,
    ) -> QueueResult<QueueEntry> {
        let result = self.update_status_inner(id, doctor_id, status).await;
        self.observe("update_status", &result);
        let entry = result?;

        self.announce(doctor_id, |queue| {
            QueueEvent::updated(doctor_id, queue, QueueAction::StatusUpdated)
                .with_entry(entry.clone())
        })
        .await;
        Ok(entry)
    }

    async fn update_status_inner(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        status: QueueStatus,
    ) -> QueueResult<QueueEntry> {
        let current = self
            .store
            .entry_get(id)
            .await?
            .ok_or_else(QueueError::entry_not_found)?;

        if current.doctor_id != doctor_id {
            warn!(
                doctor_id = %doctor_id,
                entry_id = %id,
                "Status overwrite refused for another doctor's entry"
            );
            return Err(QueueError::foreign_entry());
        }

        let updated = self
            .store
            .entry_overwrite_status(id, doctor_id, status, Utc::now())
            .await?
            .ok_or_else(QueueError::entry_not_found)?;

        let bypass = current.status != status && !current.status.can_transition_to(status);
        self.metrics.record_status_override(bypass);
        warn!(
            doctor_id = %doctor_id,
            entry_id = %id,
            from = %current.status,
            to = %status,
            bypass = bypass,
            "Queue status overwritten by operator"
        );

        Ok(updated)
    }

    /// Explicit daily reset: the next token becomes 1. Entries are untouched,
    /// but SKIPPED entries finished before now leave the active list.
    pub async fn reset_counter(&self, doctor_id: DoctorId) -> QueueResult<QueueCounter> {
        let result = self.counter.reset(doctor_id).await.map_err(QueueError::from);
        self.observe("reset_counter", &result);
        let counter = result?;

        info!(doctor_id = %doctor_id, "Token counter reset");
        self.announce(doctor_id, |queue| {
            QueueEvent::updated(doctor_id, queue, QueueAction::CounterReset)
        })
        .await;
        Ok(counter)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Non-COMPLETED entries in serving order, archived skips left out.
    pub async fn list_active(&self, doctor_id: DoctorId) -> QueueResult<Vec<QueueEntry>> {
        let skipped_since = self.counter.last_reset_at(doctor_id).await?;
        Ok(self
            .store
            .entry_list_active(doctor_id, skipped_since)
            .await?)
    }

    /// COMPLETED and SKIPPED entries, latest first. `limit` is clamped to
    /// `1..=HISTORY_LIMIT_MAX`; `None` returns everything.
    pub async fn list_history(
        &self,
        doctor_id: DoctorId,
        limit: Option<usize>,
    ) -> QueueResult<Vec<QueueEntry>> {
        let limit = limit.map(|l| l.clamp(1, HISTORY_LIMIT_MAX));
        Ok(self.store.entry_list_history(doctor_id, limit).await?)
    }

    /// Current token counter for the doctor.
    pub async fn counter(&self, doctor_id: DoctorId) -> QueueResult<QueueCounter> {
        Ok(self.counter.current(doctor_id).await?)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn announce<F>(&self, doctor_id: DoctorId, build: F)
    where
        F: FnOnce(Vec<QueueEntry>) -> QueueEvent,
    {
        match self.list_active(doctor_id).await {
            Ok(queue) => {
                let event = build(queue);
                debug!(
                    doctor_id = %doctor_id,
                    event = event.event_type(),
                    size = event.queue.len(),
                    "Publishing queue snapshot"
                );
                self.metrics.record_publish();
                self.publisher.publish(&event);
            }
            Err(err) => {
                self.metrics.record_snapshot_failure();
                warn!(
                    doctor_id = %doctor_id,
                    error = %err,
                    "Queue snapshot failed after mutation, event not published"
                );
            }
        }
    }

    fn observe<T>(&self, operation: &str, result: &QueueResult<T>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(err) => error_outcome(err),
        };
        self.metrics.record_queue_operation(operation, outcome);
    }

    fn observe_optional<T>(&self, operation: &str, result: &QueueResult<Option<T>>) {
        let outcome = match result {
            Ok(Some(_)) => "success",
            Ok(None) => "miss",
            Err(err) => error_outcome(err),
        };
        self.metrics.record_queue_operation(operation, outcome);
    }
}

fn error_outcome(err: &QueueError) -> &'static str {
    match err {
        QueueError::Validation(_) => "invalid",
        QueueError::Conflict(_) => "conflict",
        QueueError::NotFound(_) => "not_found",
        QueueError::Authorization(_) => "forbidden",
        QueueError::Upstream(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::new_entity_id;
    use clinic_storage::InMemoryQueueStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<QueueEvent>>);

    impl QueuePublisher for Recorder {
        fn publish(&self, event: &QueueEvent) {
            self.0
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.clone());
        }
    }

    fn engine() -> (QueueEngine, Arc<Recorder>) {
        let store = Arc::new(InMemoryQueueStore::new());
        let recorder = Arc::new(Recorder::default());
        let metrics = Arc::new(QueueMetrics::new().expect("metrics"));
        let engine = QueueEngine::new(
            store.clone(),
            TokenCounter::new(store),
            recorder.clone(),
            metrics,
        );
        (engine, recorder)
    }

    #[tokio::test]
    async fn test_enqueue_publishes_snapshot() -> QueueResult<()> {
        let (engine, recorder) = engine();
        let doctor = new_entity_id();

        let entry = engine
            .enqueue(doctor, new_entity_id(), Priority::Normal, None)
            .await?;
        assert_eq!(entry.token_number, 1);

        let events = recorder.0.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, QueueEventKind::QueueUpdated);
        assert_eq!(events[0].action, Some(QueueAction::Enqueued));
        assert_eq!(events[0].queue.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_publishes_nothing() -> QueueResult<()> {
        let (engine, recorder) = engine();
        let (doctor, patient) = (new_entity_id(), new_entity_id());

        engine.enqueue(doctor, patient, Priority::Normal, None).await?;
        let err = engine
            .enqueue(doctor, patient, Priority::Emergency, None)
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::patient_already_queued());
        assert_eq!(recorder.0.lock().unwrap_or_else(|e| e.into_inner()).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_call_next_is_not_an_error() -> QueueResult<()> {
        let (engine, recorder) = engine();
        assert_eq!(engine.call_next(new_entity_id()).await?, None);
        assert!(recorder.0.lock().unwrap_or_else(|e| e.into_inner()).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_bypass_is_counted() -> QueueResult<()> {
        let (engine, _recorder) = engine();
        let doctor = new_entity_id();
        let entry = engine
            .enqueue(doctor, new_entity_id(), Priority::Normal, None)
            .await?;
        engine.call_next(doctor).await?;

        let reverted = engine
            .update_status(entry.id, doctor, QueueStatus::Waiting)
            .await?;
        assert_eq!(reverted.status, QueueStatus::Waiting);
        assert!(reverted.called_at.is_none());
        assert_eq!(
            engine
                .metrics()
                .status_overrides_total
                .with_label_values(&["true"])
                .get(),
            1.0
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_history_limit_is_clamped() -> QueueResult<()> {
        let (engine, _recorder) = engine();
        let doctor = new_entity_id();
        for _ in 0..3 {
            let entry = engine
                .enqueue(doctor, new_entity_id(), Priority::Normal, None)
                .await?;
            engine.skip(entry.id, doctor).await?;
        }

        assert_eq!(engine.list_history(doctor, Some(0)).await?.len(), 1);
        assert_eq!(engine.list_history(doctor, Some(2)).await?.len(), 2);
        assert_eq!(engine.list_history(doctor, None).await?.len(), 3);
        Ok(())
    }
}
