//! Append-only event store boundary.
//!
//! Streams are keyed by aggregate id. A single `commit` may span several streams
//! and is all-or-nothing, which is what lets one sale reserve stock on many
//! records and record its cash movement in one step.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
