//! Domain events and their distribution.
//!
//! Aggregates emit typed events implementing [`Event`]. The infrastructure layer
//! persists them, then publishes [`EventEnvelope`]s on an [`EventBus`] so that
//! out-of-scope collaborators (order mailers, webhooks, analytics) can react.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
