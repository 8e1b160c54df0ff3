//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (order sinks, mailers, analytics)
//! ```
//!
//! A stale write (another request appended first) restarts the cycle from step 1
//! up to `max_retries` times. The retry re-decides against fresh state, which
//! is how a double-clicked "add to cart" increments one line instead of
//! inserting two.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use storefront_core::{
    Aggregate, AggregateId, DomainError, ExpectedVersion, RejectionReason, ValidationErrors,
};
use storefront_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend};

/// Retries after the first attempt when a stream turns out to be stale.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Input had the wrong shape or range.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    /// A business rule refused the command.
    #[error("{message}")]
    Rejected {
        reason: RejectionReason,
        message: String,
    },
    /// Domain invariant failure (deterministic).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("invalid identifier: {0}")]
    InvalidId(String),
    /// Domain-level not found.
    #[error("not found")]
    NotFound,
    /// Domain-level conflict (e.g. creating something that already exists).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Optimistic concurrency failure that outlived every retry.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl DispatchError {
    pub fn reason(&self) -> Option<RejectionReason> {
        match self {
            DispatchError::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, DispatchError::Concurrency(_))
    }

    /// What to show the shopper.
    ///
    /// Business rejections carry their own message. Consistency and storage
    /// failures collapse to a generic retry prompt: nothing was committed.
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::Validation(errors) => errors
                .errors()
                .iter()
                .map(|e| format!("{} {}", e.field.replace('_', " "), e.message))
                .collect::<Vec<_>>()
                .join(", "),
            DispatchError::Rejected { message, .. } => message.clone(),
            DispatchError::NotFound => "We couldn't find what you were looking for".to_string(),
            _ => "Something went wrong, please try again".to_string(),
        }
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(errors) => DispatchError::Validation(errors),
            DomainError::Rejected { reason, message } => DispatchError::Rejected { reason, message },
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => DispatchError::InvalidId(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
        }
    }
}

/// A rehydrated aggregate and the stream version it was read at.
#[derive(Debug, Clone)]
pub struct Loaded<A> {
    pub aggregate: A,
    pub version: u64,
}

impl<A> Loaded<A> {
    pub fn expected(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.version)
    }
}

/// Result of a successful dispatch: the aggregate after the new events, and
/// the events as committed.
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// ## Execution Guarantees
///
/// - Events are persisted before publication (if append fails, nothing is published)
/// - Each `dispatch` touches a single stream; `commit` appends several
///   streams in one store transaction
/// - Stale writes are retried from a fresh load; other failures are returned
///   immediately
///
/// ## At-Least-Once Delivery
///
/// If publication fails after a successful append the error is returned, but
/// the events stay persisted. Subscribers must tolerate redelivery.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    max_retries: u32,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate without deciding anything.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Loaded<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        Ok(Loaded {
            aggregate,
            version: stream_version(&history),
        })
    }

    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` builds the empty instance history is applied to; it is
    /// called once per attempt. An empty decision commits nothing and returns
    /// the current state.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: storefront_events::Event + Serialize + DeserializeOwned,
    {
        self.with_retry(aggregate_type, || {
            // 1) + 2) Load history and rehydrate
            let Loaded {
                mut aggregate,
                version,
            } = self.load(aggregate_id, &make_aggregate)?;

            // 3) Decide events (no mutation)
            let decided = aggregate.handle(command)?;
            if decided.is_empty() {
                return Ok(Dispatched {
                    aggregate,
                    committed: vec![],
                });
            }

            // 4) + 5) Persist, then publish
            let batch = StreamAppend::from_typed(
                aggregate_id,
                aggregate_type,
                ExpectedVersion::Exact(version),
                &decided,
            )?;
            let committed = self.commit_once(vec![batch])?;

            aggregate.apply_all(&decided);
            Ok(Dispatched {
                aggregate,
                committed,
            })
        })
    }

    /// Append several streams atomically, then publish everything committed.
    ///
    /// No retry here: the batches were decided against versions the caller
    /// loaded, so a conflict has to go back to the caller's own decision.
    pub fn commit(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, DispatchError> {
        self.commit_once(batches)
    }

    /// Run `attempt` until it succeeds, fails for a reason other than a stale
    /// stream, or runs out of retries.
    pub fn with_retry<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> Result<T, DispatchError>,
    ) -> Result<T, DispatchError> {
        let mut retries = 0;
        loop {
            match attempt() {
                Err(DispatchError::Concurrency(msg)) if retries < self.max_retries => {
                    retries += 1;
                    warn!(operation, retries, conflict = %msg, "stale write, retrying");
                }
                other => return other,
            }
        }
    }

    fn commit_once(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed = self.store.append_all(batches)?;

        for stored in &committed {
            debug!(
                event_type = %stored.event_type,
                aggregate_id = %stored.aggregate_id,
                sequence_number = stored.sequence_number,
                "event committed"
            );
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // A buggy backend must not leak another stream's events into this one,
    // and sequence numbers must be strictly increasing from 1.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
