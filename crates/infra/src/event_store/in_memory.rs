use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use storefront_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev. A single write lock covers every stream, which is
/// what makes [`EventStore::append_all`] atomic here.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all streams.
    pub fn event_count(&self) -> usize {
        self.streams
            .read()
            .map(|streams| streams.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Every event of a batch targets the batch's stream with a single type.
    fn validate_batch(batch: &StreamAppend) -> Result<(), EventStoreError> {
        let Some(first) = batch.events.first() else {
            return Ok(());
        };

        for (idx, e) in batch.events.iter().enumerate() {
            if e.aggregate_id != batch.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch for {} contains an event for {} (index {idx})",
                    batch.aggregate_id, e.aggregate_id
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }
        Ok(())
    }

    fn lock_poisoned() -> EventStoreError {
        EventStoreError::Unavailable("lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };
        let aggregate_id = first.aggregate_id;

        self.append_all(vec![StreamAppend::new(aggregate_id, expected_version, events)])
    }

    fn append_all(&self, batches: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut seen = HashSet::new();
        for batch in &batches {
            if !seen.insert(batch.aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {} appears twice in one transaction",
                    batch.aggregate_id
                )));
            }
            Self::validate_batch(batch)?;
        }

        let mut streams = self.streams.write().map_err(|_| Self::lock_poisoned())?;

        // Check every expectation before the first write.
        for batch in &batches {
            let stream = streams
                .get(&batch.aggregate_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let current = Self::current_version(stream);

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    batch.aggregate_id, batch.expected_version
                )));
            }

            // Enforce aggregate type stability across the stream.
            if let (Some(existing), Some(incoming)) = (stream.first(), batch.events.first()) {
                if existing.aggregate_type != incoming.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, incoming.aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for batch in batches {
            if batch.events.is_empty() {
                continue;
            }

            let stream = streams.entry(batch.aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| Self::lock_poisoned())?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: format!("{aggregate_type}.touched"),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({ "touched": true }),
        }
    }

    #[test]
    fn append_assigns_consecutive_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = store
            .append(vec![event(id, "carts.cart"), event(id, "carts.cart")], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store
            .append(vec![event(id, "carts.cart")], ExpectedVersion::Exact(2))
            .unwrap();

        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), [1, 2]);
        assert_eq!(second[0].sequence_number, 3);
        assert_eq!(store.load_stream(id).unwrap().len(), 3);
    }

    #[test]
    fn stale_expectation_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "carts.cart")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append(vec![event(id, "carts.cart")], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert_eq!(store.load_stream(id).unwrap().len(), 1);
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "carts.cart")], ExpectedVersion::Any)
            .unwrap();

        let err = store
            .append(vec![event(id, "checkout.checkout")], ExpectedVersion::Any)
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn multi_stream_append_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let cart = AggregateId::new();
        let order = AggregateId::new();
        store
            .append(vec![event(cart, "carts.cart")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append_all(vec![
                StreamAppend::new(order, ExpectedVersion::Exact(0), vec![event(order, "checkout.order")]),
                // stale: the cart is already at version 1
                StreamAppend::new(cart, ExpectedVersion::Exact(0), vec![event(cart, "carts.cart")]),
            ])
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(order).unwrap().is_empty());
        assert_eq!(store.event_count(), 1);

        let committed = store
            .append_all(vec![
                StreamAppend::new(order, ExpectedVersion::Exact(0), vec![event(order, "checkout.order")]),
                StreamAppend::new(cart, ExpectedVersion::Exact(1), vec![event(cart, "carts.cart")]),
            ])
            .unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(store.event_count(), 3);
    }

    #[test]
    fn duplicate_stream_in_one_transaction_is_invalid() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let err = store
            .append_all(vec![
                StreamAppend::new(id, ExpectedVersion::Any, vec![event(id, "carts.cart")]),
                StreamAppend::new(id, ExpectedVersion::Any, vec![event(id, "carts.cart")]),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn batch_must_target_its_own_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let err = store
            .append_all(vec![StreamAppend::new(
                id,
                ExpectedVersion::Any,
                vec![event(AggregateId::new(), "carts.cart")],
            )])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    proptest! {
        /// Whatever mix of fresh and stale transactions arrives, each stream
        /// stays gap-free and failed transactions leave no trace.
        #[test]
        fn streams_stay_contiguous(
            txs in prop::collection::vec(
                prop::collection::vec((0usize..3, 1usize..4, prop::bool::ANY), 1..3),
                1..25,
            ),
        ) {
            let store = InMemoryEventStore::new();
            let ids = [AggregateId::new(), AggregateId::new(), AggregateId::new()];
            let mut expected_len = [0u64; 3];

            for tx in txs {
                // One batch per stream: keep the first mention of each.
                let mut seen = HashSet::new();
                let writes: Vec<(usize, usize, bool)> =
                    tx.into_iter().filter(|(stream, _, _)| seen.insert(*stream)).collect();
                let any_stale = writes.iter().any(|(_, _, stale)| *stale);

                let batches = writes
                    .iter()
                    .map(|&(stream, count, stale)| {
                        let id = ids[stream];
                        let version = expected_len[stream] + u64::from(stale);
                        let events = (0..count).map(|_| event(id, "carts.cart")).collect();
                        StreamAppend::new(id, ExpectedVersion::Exact(version), events)
                    })
                    .collect();

                let result = store.append_all(batches);
                prop_assert_eq!(result.is_ok(), !any_stale);

                if result.is_ok() {
                    for (stream, count, _) in writes {
                        expected_len[stream] += count as u64;
                    }
                }
            }

            for (idx, id) in ids.iter().enumerate() {
                let stream = store.load_stream(*id).unwrap();
                prop_assert_eq!(stream.len() as u64, expected_len[idx]);
                for (pos, stored) in stream.iter().enumerate() {
                    prop_assert_eq!(stored.sequence_number, pos as u64 + 1);
                }
            }
        }
    }
}
