//! In-memory queue store.
//!
//! One `tokio::sync::Mutex` guards all state, so each trait method runs as a
//! single critical section. That gives the same atomicity the PostgreSQL
//! store gets from conditional `UPDATE ... RETURNING` statements.

use crate::traits::{CounterStore, QueueStore};
use ::async_trait::async_trait;
use clinic_core::{
    history_order, sort_queue, DoctorId, PatientId, QueueCounter, QueueEntry, QueueEntryId,
    QueueStatus, StorageError, StorageResult, Timestamp,
};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<QueueEntryId, QueueEntry>,
    counters: HashMap<DoctorId, QueueCounter>,
}

impl Inner {
    fn active_for(
        &self,
        doctor_id: DoctorId,
        patient_id: PatientId,
        except: Option<QueueEntryId>,
    ) -> Option<&QueueEntry> {
        self.entries.values().find(|e| {
            e.doctor_id == doctor_id
                && e.patient_id == patient_id
                && e.status.is_active()
                && Some(e.id) != except
        })
    }
}

/// In-memory queue and counter store.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    inner: Mutex<Inner>,
}

impl InMemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of entries, all doctors and statuses.
    pub async fn entry_count(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

#[async_trait]
impl CounterStore for InMemoryQueueStore {
    async fn counter_increment(&self, doctor_id: DoctorId) -> StorageResult<i64> {
        let mut inner = self.inner.lock().await;
        let counter = inner
            .counters
            .entry(doctor_id)
            .or_insert_with(|| QueueCounter::fresh(doctor_id, chrono::Utc::now()));
        counter.current_token_number += 1;
        Ok(counter.current_token_number)
    }

    async fn counter_reset(
        &self,
        doctor_id: DoctorId,
        now: Timestamp,
    ) -> StorageResult<QueueCounter> {
        let mut inner = self.inner.lock().await;
        let counter = QueueCounter::fresh(doctor_id, now);
        inner.counters.insert(doctor_id, counter.clone());
        Ok(counter)
    }

    async fn counter_get(&self, doctor_id: DoctorId) -> StorageResult<Option<QueueCounter>> {
        let inner = self.inner.lock().await;
        Ok(inner.counters.get(&doctor_id).cloned())
    }

    async fn counter_list_reset_due(&self, before: Timestamp) -> StorageResult<Vec<QueueCounter>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .counters
            .values()
            .filter(|c| c.last_reset_at < before)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn entry_insert(&self, entry: &QueueEntry) -> StorageResult<()> {
        let mut inner = self.inner.lock().await;
        if entry.status.is_active()
            && inner
                .active_for(entry.doctor_id, entry.patient_id, None)
                .is_some()
        {
            return Err(StorageError::DuplicateActiveEntry {
                doctor_id: entry.doctor_id,
                patient_id: entry.patient_id,
            });
        }
        if inner.entries.contains_key(&entry.id) {
            return Err(StorageError::Query {
                reason: format!("queue entry {} already exists", entry.id),
            });
        }
        inner.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn entry_claim_next(
        &self,
        doctor_id: DoctorId,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        let mut inner = self.inner.lock().await;
        let mut waiting: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.doctor_id == doctor_id && e.status == QueueStatus::Waiting)
            .cloned()
            .collect();
        sort_queue(&mut waiting);

        let Some(next) = waiting.first() else {
            return Ok(None);
        };
        let Some(entry) = inner.entries.get_mut(&next.id) else {
            return Ok(None);
        };
        entry.apply_transition(QueueStatus::InProgress, now);
        Ok(Some(entry.clone()))
    }

    async fn entry_transition(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        expected: QueueStatus,
        next: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(&id) {
            Some(entry) if entry.doctor_id == doctor_id && entry.status == expected => {
                entry.apply_transition(next, now);
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn entry_overwrite_status(
        &self,
        id: QueueEntryId,
        doctor_id: DoctorId,
        status: QueueStatus,
        now: Timestamp,
    ) -> StorageResult<Option<QueueEntry>> {
        let mut inner = self.inner.lock().await;
        let (patient_id, was_active) = match inner.entries.get(&id) {
            Some(entry) if entry.doctor_id == doctor_id => (entry.patient_id, entry.status.is_active()),
            _ => return Ok(None),
        };

        if status.is_active()
            && !was_active
            && inner.active_for(doctor_id, patient_id, Some(id)).is_some()
        {
            return Err(StorageError::DuplicateActiveEntry {
                doctor_id,
                patient_id,
            });
        }

        match inner.entries.get_mut(&id) {
            Some(entry) => {
                entry.apply_override(status, now);
                Ok(Some(entry.clone()))
            }
            None => Ok(None),
        }
    }

    async fn entry_get(&self, id: QueueEntryId) -> StorageResult<Option<QueueEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(&id).cloned())
    }

    async fn entry_find_active(
        &self,
        doctor_id: DoctorId,
        patient_id: PatientId,
    ) -> StorageResult<Option<QueueEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner.active_for(doctor_id, patient_id, None).cloned())
    }

    async fn entry_list_active(
        &self,
        doctor_id: DoctorId,
        skipped_since: Option<Timestamp>,
    ) -> StorageResult<Vec<QueueEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.doctor_id == doctor_id && e.is_listed_active(skipped_since))
            .cloned()
            .collect();
        sort_queue(&mut entries);
        Ok(entries)
    }

    async fn entry_list_history(
        &self,
        doctor_id: DoctorId,
        limit: Option<usize>,
    ) -> StorageResult<Vec<QueueEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<QueueEntry> = inner
            .entries
            .values()
            .filter(|e| e.doctor_id == doctor_id && e.status.is_terminal())
            .cloned()
            .collect();
        entries.sort_by(history_order);
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let _inner = self.inner.lock().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clinic_core::{new_entity_id, Priority};

    fn waiting(doctor: DoctorId, patient: PatientId, token: i64, priority: Priority) -> QueueEntry {
        QueueEntry::waiting(doctor, patient, token, priority, None, Utc::now())
    }

    #[tokio::test]
    async fn test_counter_starts_at_one_and_resets() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let doctor = new_entity_id();

        assert_eq!(store.counter_get(doctor).await?, None);
        assert_eq!(store.counter_increment(doctor).await?, 1);
        assert_eq!(store.counter_increment(doctor).await?, 2);

        let reset = store.counter_reset(doctor, Utc::now()).await?;
        assert_eq!(reset.current_token_number, 0);
        assert_eq!(store.counter_increment(doctor).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_counters_are_per_doctor() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let (a, b) = (new_entity_id(), new_entity_id());
        assert_eq!(store.counter_increment(a).await?, 1);
        assert_eq!(store.counter_increment(a).await?, 2);
        assert_eq!(store.counter_increment(b).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_rejects_second_active_entry() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let (doctor, patient) = (new_entity_id(), new_entity_id());
        store.entry_insert(&waiting(doctor, patient, 1, Priority::Normal)).await?;

        let err = store
            .entry_insert(&waiting(doctor, patient, 2, Priority::Normal))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_active());

        // Same patient with another doctor is fine.
        store
            .entry_insert(&waiting(new_entity_id(), patient, 1, Priority::Normal))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_allowed_after_terminal() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let (doctor, patient) = (new_entity_id(), new_entity_id());
        let first = waiting(doctor, patient, 1, Priority::Normal);
        store.entry_insert(&first).await?;
        store
            .entry_transition(first.id, doctor, QueueStatus::Waiting, QueueStatus::Skipped, Utc::now())
            .await?;

        store.entry_insert(&waiting(doctor, patient, 2, Priority::Normal)).await?;
        assert_eq!(store.entry_count().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_next_prefers_emergency() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let doctor = new_entity_id();
        store.entry_insert(&waiting(doctor, new_entity_id(), 1, Priority::Normal)).await?;
        store.entry_insert(&waiting(doctor, new_entity_id(), 2, Priority::Emergency)).await?;

        let claimed = store.entry_claim_next(doctor, Utc::now()).await?;
        let claimed = claimed.expect("an entry should be claimed");
        assert_eq!(claimed.token_number, 2);
        assert_eq!(claimed.status, QueueStatus::InProgress);
        assert!(claimed.called_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_next_empty() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        assert_eq!(store.entry_claim_next(new_entity_id(), Utc::now()).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_transition_requires_owner_and_status() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let doctor = new_entity_id();
        let entry = waiting(doctor, new_entity_id(), 1, Priority::Normal);
        store.entry_insert(&entry).await?;
        let now = Utc::now();

        let wrong_doctor = store
            .entry_transition(entry.id, new_entity_id(), QueueStatus::Waiting, QueueStatus::Skipped, now)
            .await?;
        assert!(wrong_doctor.is_none());

        let wrong_status = store
            .entry_transition(entry.id, doctor, QueueStatus::InProgress, QueueStatus::Completed, now)
            .await?;
        assert!(wrong_status.is_none());

        let missing = store
            .entry_transition(new_entity_id(), doctor, QueueStatus::Waiting, QueueStatus::Skipped, now)
            .await?;
        assert!(missing.is_none());

        let skipped = store
            .entry_transition(entry.id, doctor, QueueStatus::Waiting, QueueStatus::Skipped, now)
            .await?;
        assert_eq!(skipped.map(|e| e.status), Some(QueueStatus::Skipped));
        Ok(())
    }

    #[tokio::test]
    async fn test_overwrite_respects_uniqueness() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let (doctor, patient) = (new_entity_id(), new_entity_id());
        let old = waiting(doctor, patient, 1, Priority::Normal);
        store.entry_insert(&old).await?;
        store
            .entry_overwrite_status(old.id, doctor, QueueStatus::Completed, Utc::now())
            .await?;
        store.entry_insert(&waiting(doctor, patient, 2, Priority::Normal)).await?;

        let err = store
            .entry_overwrite_status(old.id, doctor, QueueStatus::Waiting, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_duplicate_active());
        Ok(())
    }

    #[tokio::test]
    async fn test_overwrite_scoped_to_doctor() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let doctor = new_entity_id();
        let entry = waiting(doctor, new_entity_id(), 1, Priority::Normal);
        store.entry_insert(&entry).await?;

        let other = store
            .entry_overwrite_status(entry.id, new_entity_id(), QueueStatus::Completed, Utc::now())
            .await?;
        assert!(other.is_none());
        assert_eq!(
            store.entry_get(entry.id).await?.map(|e| e.status),
            Some(QueueStatus::Waiting)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_list_active_excludes_completed() -> StorageResult<()> {
        let store = InMemoryQueueStore::new();
        let doctor = new_entity_id();
        let a = waiting(doctor, new_entity_id(), 1, Priority::Normal);
        let b = waiting(doctor, new_entity_id(), 2, Priority::Normal);
        let c = waiting(doctor, new_entity_id(), 3, Priority::Normal);
        for e in [&a, &b, &c] {
            store.entry_insert(e).await?;
        }
        let now = Utc::now();
        store.entry_transition(a.id, doctor, QueueStatus::Waiting, QueueStatus::InProgress, now).await?;
        store.entry_transition(a.id, doctor, QueueStatus::InProgress, QueueStatus::Completed, now).await?;
        store.entry_transition(b.id, doctor, QueueStatus::Waiting, QueueStatus::Skipped, now).await?;

        let active = store.entry_list_active(doctor, None).await?;
        let ids: Vec<QueueEntryId> = active.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![b.id, c.id]);

        let history = store.entry_list_history(doctor, None).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(store.entry_list_history(doctor, Some(1)).await?.len(), 1);
        Ok(())
    }
}
