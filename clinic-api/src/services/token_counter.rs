//! Token Counter Service
//!
//! Per-doctor token issuance on top of the store's atomic
//! increment-and-read. No state is held here.

use clinic_core::{DoctorId, QueueCounter, StorageResult};
use clinic_storage::CounterStore;
use std::sync::Arc;

/// Hands out queue tokens for each doctor.
#[derive(Clone)]
pub struct TokenCounter {
    store: Arc<dyn CounterStore>,
}

impl TokenCounter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Next token for the doctor. The first token after creation or a
    /// reset is 1; concurrent callers never see the same value.
    pub async fn next_token(&self, doctor_id: DoctorId) -> StorageResult<i64> {
        self.store.counter_increment(doctor_id).await
    }

    /// Restart the doctor's sequence at 0. Queue entries are not touched.
    pub async fn reset(&self, doctor_id: DoctorId) -> StorageResult<QueueCounter> {
        self.store.counter_reset(doctor_id, chrono::Utc::now()).await
    }

    /// Current counter, or a zeroed view when the doctor has never enqueued.
    pub async fn current(&self, doctor_id: DoctorId) -> StorageResult<QueueCounter> {
        Ok(self
            .store
            .counter_get(doctor_id)
            .await?
            .unwrap_or_else(|| QueueCounter::fresh(doctor_id, chrono::Utc::now())))
    }

    /// The doctor's archival boundary for skipped entries, if a counter exists.
    pub async fn last_reset_at(
        &self,
        doctor_id: DoctorId,
    ) -> StorageResult<Option<clinic_core::Timestamp>> {
        Ok(self
            .store
            .counter_get(doctor_id)
            .await?
            .map(|c| c.last_reset_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::new_entity_id;
    use clinic_storage::InMemoryQueueStore;
    use futures_util::future::join_all;

    fn counter() -> TokenCounter {
        TokenCounter::new(Arc::new(InMemoryQueueStore::new()))
    }

    #[tokio::test]
    async fn test_first_token_is_one() -> StorageResult<()> {
        let counter = counter();
        let doctor = new_entity_id();
        assert_eq!(counter.current(doctor).await?.current_token_number, 0);
        assert_eq!(counter.next_token(doctor).await?, 1);
        assert_eq!(counter.next_token(doctor).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_doctors_have_independent_sequences() -> StorageResult<()> {
        let counter = counter();
        let (a, b) = (new_entity_id(), new_entity_id());
        counter.next_token(a).await?;
        counter.next_token(a).await?;
        assert_eq!(counter.next_token(b).await?, 1);
        assert_eq!(counter.next_token(a).await?, 3);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tokens_are_contiguous() -> StorageResult<()> {
        let counter = counter();
        let doctor = new_entity_id();
        let n = 64;

        let results = join_all((0..n).map(|_| {
            let counter = counter.clone();
            async move { counter.next_token(doctor).await }
        }))
        .await;

        let mut tokens = results.into_iter().collect::<StorageResult<Vec<i64>>>()?;
        tokens.sort_unstable();
        assert_eq!(tokens, (1..=n).collect::<Vec<i64>>());
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_restarts_at_one() -> StorageResult<()> {
        let counter = counter();
        let doctor = new_entity_id();
        counter.next_token(doctor).await?;
        counter.next_token(doctor).await?;

        let reset = counter.reset(doctor).await?;
        assert_eq!(reset.current_token_number, 0);
        assert_eq!(counter.last_reset_at(doctor).await?, Some(reset.last_reset_at));
        assert_eq!(counter.next_token(doctor).await?, 1);
        Ok(())
    }
}
