//! Bounded in-memory store of notification events.
//!
//! Events are kept in arrival order. Once the store holds more than its
//! capacity, the oldest entries are evicted. Nothing is persisted; a restart
//! starts empty.

mod event_store;

pub use event_store::{EventStore, DEFAULT_CAPACITY};
