//! Append-only event store boundary.
//!
//! Storage-agnostic abstraction for aggregate event streams. The in-memory
//! store is the reference implementation; a relational backend would map
//! `append_all` onto a single transaction.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
