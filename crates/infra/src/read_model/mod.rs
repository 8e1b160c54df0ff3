//! Lookup indexes maintained alongside the event streams.

pub mod index;

pub use index::{InMemoryIndex, IndexError, LookupIndex};
