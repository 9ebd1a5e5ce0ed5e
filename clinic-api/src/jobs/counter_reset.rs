//! Daily Token Counter Reset
//!
//! Optional background task that restarts token numbering once per day.
//! Each tick computes the most recent reset boundary (today at the configured
//! UTC hour, or yesterday's if that hour has not arrived yet) and resets
//! every counter whose `last_reset_at` precedes it. Resets go through
//! [`QueueEngine::reset_counter`] so connected clients receive the refreshed
//! queue.
//!
//! The task is off unless `CLINIC_COUNTER_RESET_ENABLED=true`; the manual
//! `POST /queue/counter/reset` endpoint covers the default deployment.
//!
//! ```rust
//! use clinic_api::jobs::CounterResetConfig;
//! use std::time::Duration;
//!
//! let config = CounterResetConfig {
//!     enabled: true,
//!     reset_hour_utc: 2,
//!     check_interval: Duration::from_secs(300),
//! };
//! assert!(config.enabled);
//! ```

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use clinic_core::Timestamp;
use clinic_storage::CounterStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::services::QueueEngine;

/// Default polling interval for the reset boundary.
pub const DEFAULT_COUNTER_RESET_CHECK_INTERVAL_SECS: u64 = 60;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the counter reset task.
#[derive(Debug, Clone)]
pub struct CounterResetConfig {
    /// Whether the task runs at all (default: false)
    pub enabled: bool,

    /// Hour of day, UTC, at which numbering restarts (default: 0)
    pub reset_hour_utc: u32,

    /// How often to look for counters past the boundary (default: 60 seconds)
    pub check_interval: Duration,
}

impl Default for CounterResetConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            reset_hour_utc: 0,
            check_interval: Duration::from_secs(DEFAULT_COUNTER_RESET_CHECK_INTERVAL_SECS),
        }
    }
}

impl CounterResetConfig {
    /// Create CounterResetConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CLINIC_COUNTER_RESET_ENABLED`: "true" to run the task (default: false)
    /// - `CLINIC_COUNTER_RESET_HOUR_UTC`: 0-23 (default: 0); out-of-range values fall back to 0
    /// - `CLINIC_COUNTER_RESET_CHECK_INTERVAL_SECS`: Polling interval (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("CLINIC_COUNTER_RESET_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.enabled);

        let reset_hour_utc = std::env::var("CLINIC_COUNTER_RESET_HOUR_UTC")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|h| *h < 24)
            .unwrap_or(defaults.reset_hour_utc);

        let check_interval = std::env::var("CLINIC_COUNTER_RESET_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.check_interval);

        Self {
            enabled,
            reset_hour_utc,
            check_interval,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for reset activity since startup.
#[derive(Debug, Default)]
pub struct CounterResetMetrics {
    pub counters_reset: AtomicU64,
    pub reset_cycles: AtomicU64,
    pub reset_errors: AtomicU64,
}

impl CounterResetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterResetSnapshot {
        CounterResetSnapshot {
            counters_reset: self.counters_reset.load(Ordering::Relaxed),
            reset_cycles: self.reset_cycles.load(Ordering::Relaxed),
            reset_errors: self.reset_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterResetSnapshot {
    pub counters_reset: u64,
    pub reset_cycles: u64,
    pub reset_errors: u64,
}

// ============================================================================
// BOUNDARY
// ============================================================================

/// The latest instant at or before `now` that falls on `reset_hour_utc:00`.
pub fn reset_boundary(now: Timestamp, reset_hour_utc: u32) -> Timestamp {
    let Some(naive) = now.date_naive().and_hms_opt(reset_hour_utc.min(23), 0, 0) else {
        return now;
    };
    let today = Utc.from_utc_datetime(&naive);

    if today <= now {
        today
    } else {
        today - ChronoDuration::days(1)
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that resets counters at the daily boundary.
///
/// Runs until the shutdown signal is received and returns its metrics.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(counter_reset_task(engine, store, config, shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn counter_reset_task(
    engine: QueueEngine,
    store: Arc<dyn CounterStore>,
    config: CounterResetConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<CounterResetMetrics> {
    let metrics = Arc::new(CounterResetMetrics::new());

    let mut ticker = interval(config.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        reset_hour_utc = config.reset_hour_utc,
        check_interval_secs = config.check_interval.as_secs(),
        "Counter reset task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Counter reset task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let boundary = reset_boundary(Utc::now(), config.reset_hour_utc);
                run_reset_cycle(&engine, store.as_ref(), boundary, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        counters_reset = snapshot.counters_reset,
        reset_cycles = snapshot.reset_cycles,
        reset_errors = snapshot.reset_errors,
        "Counter reset task completed"
    );

    metrics
}

/// One pass: reset every counter last reset before `boundary`.
async fn run_reset_cycle(
    engine: &QueueEngine,
    store: &dyn CounterStore,
    boundary: Timestamp,
    metrics: &CounterResetMetrics,
) -> u64 {
    metrics.reset_cycles.fetch_add(1, Ordering::Relaxed);

    let due = match store.counter_list_reset_due(boundary).await {
        Ok(due) => due,
        Err(err) => {
            tracing::error!(error = %err, "Failed to list counters due for reset");
            metrics.reset_errors.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
    };

    let mut reset = 0u64;
    for counter in due {
        match engine.reset_counter(counter.doctor_id).await {
            Ok(_) => {
                reset += 1;
                metrics.counters_reset.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    doctor_id = %counter.doctor_id,
                    "Failed to reset token counter"
                );
                metrics.reset_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if reset > 0 {
        tracing::info!(count = reset, boundary = %boundary, "Daily counter reset completed");
    } else {
        tracing::trace!("Counter reset cycle found nothing due");
    }
    reset
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::QueueEvent;
    use crate::services::{QueuePublisher, TokenCounter};
    use chrono::DateTime;
    use crate::telemetry::QueueMetrics;
    use clinic_core::{new_entity_id, Priority};
    use clinic_storage::InMemoryQueueStore;

    struct Silent;

    impl QueuePublisher for Silent {
        fn publish(&self, _event: &QueueEvent) {}
    }

    fn engine(store: Arc<InMemoryQueueStore>) -> QueueEngine {
        QueueEngine::new(
            store.clone(),
            TokenCounter::new(store),
            Arc::new(Silent),
            Arc::new(QueueMetrics::new().expect("metrics")),
        )
    }

    fn at(rfc3339: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(rfc3339)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn test_config_default() {
        let config = CounterResetConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.reset_hour_utc, 0);
        assert_eq!(
            config.check_interval,
            Duration::from_secs(DEFAULT_COUNTER_RESET_CHECK_INTERVAL_SECS)
        );
    }

    #[test]
    fn test_boundary_after_reset_hour_is_today() {
        let boundary = reset_boundary(at("2024-03-10T09:15:00Z"), 6);
        assert_eq!(boundary, at("2024-03-10T06:00:00Z"));
    }

    #[test]
    fn test_boundary_before_reset_hour_is_yesterday() {
        let boundary = reset_boundary(at("2024-03-10T04:59:59Z"), 6);
        assert_eq!(boundary, at("2024-03-09T06:00:00Z"));
    }

    #[test]
    fn test_boundary_at_exact_hour() {
        let now = at("2024-03-10T00:00:00Z");
        assert_eq!(reset_boundary(now, 0), now);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = CounterResetMetrics::new();
        metrics.counters_reset.store(4, Ordering::Relaxed);
        metrics.reset_cycles.store(2, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters_reset, 4);
        assert_eq!(snapshot.reset_cycles, 2);
        assert_eq!(snapshot.reset_errors, 0);
    }

    #[tokio::test]
    async fn test_cycle_resets_only_stale_counters() -> clinic_core::QueueResult<()> {
        let store = Arc::new(InMemoryQueueStore::new());
        let engine = engine(store.clone());
        let stale = new_entity_id();
        let fresh = new_entity_id();

        for doctor in [stale, fresh] {
            engine.enqueue(doctor, new_entity_id(), Priority::Normal, None).await?;
            engine.enqueue(doctor, new_entity_id(), Priority::Normal, None).await?;
        }
        // Backdate the stale doctor's last reset, keeping its count.
        store.counter_reset(stale, at("2020-01-01T00:00:00Z")).await?;
        store.counter_increment(stale).await?;

        let metrics = CounterResetMetrics::new();
        let boundary = Utc::now() - ChronoDuration::hours(1);
        let reset = run_reset_cycle(&engine, store.as_ref(), boundary, &metrics).await;

        assert_eq!(reset, 1);
        assert_eq!(engine.counter(stale).await?.current_token_number, 0);
        assert_eq!(engine.counter(fresh).await?.current_token_number, 2);
        assert_eq!(metrics.snapshot().reset_errors, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let store = Arc::new(InMemoryQueueStore::new());
        let config = CounterResetConfig {
            enabled: true,
            reset_hour_utc: 0,
            check_interval: Duration::from_millis(10),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(counter_reset_task(
            engine(store.clone()),
            store,
            config,
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).expect("task alive");

        let metrics = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task finished")
            .expect("task joined");
        assert!(metrics.snapshot().reset_cycles >= 1);
    }
}
