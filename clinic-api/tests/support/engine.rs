#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clinic_api::events::QueueEvent;
use clinic_api::services::{QueueEngine, QueuePublisher, TokenCounter};
use clinic_api::telemetry::QueueMetrics;
use clinic_core::{
    DoctorId, PatientId, QueueEntry, QueueEntryId, QueueStatus, StorageError, StorageResult,
    Timestamp,
};
use clinic_storage::{InMemoryQueueStore, QueueStore};

// ============================================================================
// RECORDING PUBLISHER
// ============================================================================

/// Publisher that keeps every event it is handed.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<QueueEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn last(&self) -> Option<QueueEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

impl QueuePublisher for RecordingPublisher {
    fn publish(&self, event: &QueueEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// In-memory store whose active-list read can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryQueueStore,
    fail_list_active: AtomicBool,
}

impl FlakyStore {
    pub fn fail_snapshots(&self, fail: bool) {
        self.fail_list_active.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn entry_insert(&self, entry: &QueueEntry) -> StorageResult<()> {
        self.inner.entry_insert(entry).await
    }

    async fn entry_claim_next(
        &self,
        doctor_id: DoctorId,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        self.inner.entry_claim_next(doctor_id, now).await
    }

    async fn entry_transition(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        expected: QueueStatus,
        next: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        self.inner
            .entry_transition(id, doctor_id, expected, next, now)
            .await
    }

    async fn entry_overwrite_status(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        status: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        self.inner
            .entry_overwrite_status(id, doctor_id, status, now)
            .await
    }

    async fn entry_get(&self, id: QueueEntryId) -> StorageResult<Option<QueueEntry>> {
        self.inner.entry_get(id).await
    }

    async fn entry_find_active(
        &self,
        doctor_id: DoctorId,
        patient_id: PatientId,
    ) -> StorageResult<Option<QueueEntry>> {
        self.inner.entry_find_active(doctor_id, patient_id).await
    }

    async fn entry_list_active(
        &self,
        doctor_id: DoctorId,
        skipped_since: Option<Timestamp>,
    ) -> StorageResult<Vec<QueueEntry>> {
        if self.fail_list_active.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "snapshot read disabled".to_string(),
            });
        }
        self.inner.entry_list_active(doctor_id, skipped_since).await
    }

    async fn entry_list_history(
        &self,
        doctor_id: DoctorId,
        limit: Option<usize>,
    ) -> StorageResult<Vec<QueueEntry>> {
        self.inner.entry_list_history(doctor_id, limit).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

// ============================================================================
// ENGINE BUILDERS
// ============================================================================

pub struct TestEngine {
    pub engine: QueueEngine,
    pub store: Arc<InMemoryQueueStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub metrics: Arc<QueueMetrics>,
}

/// Engine over a fresh in-memory store with a recording publisher.
pub fn test_engine() -> TestEngine {
    let store = Arc::new(InMemoryQueueStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let metrics = Arc::new(QueueMetrics::new().expect("metrics registry"));
    let engine = QueueEngine::new(
        store.clone(),
        TokenCounter::new(store.clone()),
        publisher.clone(),
        metrics.clone(),
    );
    TestEngine {
        engine,
        store,
        publisher,
        metrics,
    }
}

/// Engine whose snapshot reads can be switched off.
pub fn flaky_engine() -> (QueueEngine, Arc<FlakyStore>, Arc<RecordingPublisher>) {
    let store = Arc::new(FlakyStore::default());
    let counters = Arc::new(InMemoryQueueStore::new());
    let publisher = Arc::new(RecordingPublisher::default());
    let metrics = Arc::new(QueueMetrics::new().expect("metrics registry"));
    let engine = QueueEngine::new(
        store.clone(),
        TokenCounter::new(counters),
        publisher.clone(),
        metrics,
    );
    (engine, store, publisher)
}
