//! Service Layer
//!
//! Queue business logic, independent of HTTP and WebSocket transport.

mod queue_service;
mod token_counter;

pub use queue_service::*;
pub use token_counter::*;
