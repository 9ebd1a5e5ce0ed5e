//! Clinic Storage - Queue Store Traits
//!
//! Defines the atomic primitives the queue engine relies on and provides an
//! in-memory implementation used for local runs and tests. The PostgreSQL
//! implementation lives with the API server, next to its connection pool.

pub mod memory;
pub mod traits;

pub use memory::InMemoryQueueStore;
pub use traits::{CounterStore, QueueStore};
