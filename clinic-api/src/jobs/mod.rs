//! Background Jobs for the Clinic API
//!
//! - `counter_reset`: optional daily token counter reset
//!
//! # Usage
//!
//! ```ignore
//! use clinic_api::jobs::{counter_reset_task, CounterResetConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let config = CounterResetConfig::from_env();
//! if config.enabled {
//!     tokio::spawn(counter_reset_task(engine.clone(), counter_store, config, shutdown_rx));
//! }
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod counter_reset;

pub use counter_reset::{
    counter_reset_task, reset_boundary, CounterResetConfig, CounterResetMetrics,
    CounterResetSnapshot,
};
