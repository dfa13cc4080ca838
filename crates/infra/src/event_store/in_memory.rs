use std::collections::HashMap;
use std::sync::RwLock;

use retailpos_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

/// In-memory append-only event store.
///
/// One write lock covers the whole commit, so the version checks and the writes
/// of a multi-stream commit are observed together.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: Option<&Vec<StoredEvent>>) -> u64 {
        stream
            .and_then(|s| s.last())
            .map(|e| e.sequence_number)
            .unwrap_or(0)
    }

    fn validate_batch(append: &StreamAppend) -> Result<(), EventStoreError> {
        let Some(first) = append.events.first() else {
            return Ok(());
        };
        for (idx, e) in append.events.iter().enumerate() {
            if e.aggregate_id != append.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch for {} contains aggregate_id {} (index {idx})",
                    append.aggregate_id, e.aggregate_id
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
}

impl EventStore for InMemoryEventStore {
    fn commit(&self, appends: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let appends: Vec<StreamAppend> = appends.into_iter().filter(|a| !a.events.is_empty()).collect();
        if appends.is_empty() {
            return Ok(vec![]);
        }

        for (idx, a) in appends.iter().enumerate() {
            Self::validate_batch(a)?;
            if appends[..idx].iter().any(|prev| prev.aggregate_id == a.aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "stream {} appears twice in one commit",
                    a.aggregate_id
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        // Check every stream before touching any of them.
        for a in &appends {
            let stream = streams.get(&a.aggregate_id);
            let current = Self::current_version(stream);
            if !a.expected.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    a.aggregate_id, a.expected
                )));
            }
            if let Some(existing) = stream.and_then(|s| s.first()) {
                let incoming = &a.events[0].aggregate_type;
                if &existing.aggregate_type != incoming {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{incoming}'",
                        existing.aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for a in appends {
            let stream = streams.entry(a.aggregate_id).or_default();
            let mut next = Self::current_version(Some(&*stream)) + 1;
            for e in a.events {
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
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use chrono::Utc;
    use retailpos_core::ExpectedVersion;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({ "n": 1 }),
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_and_are_gap_free() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "a"), event(id, "a")], ExpectedVersion::NoStream)
            .unwrap();
        let more = store.append(vec![event(id, "a")], ExpectedVersion::Exact(2)).unwrap();

        assert_eq!(more[0].sequence_number, 3);
        let seqs: Vec<u64> = store.load_stream(id).unwrap().iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(id, "a")], ExpectedVersion::Exact(0)).unwrap();
        let err = store.append(vec![event(id, "a")], ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn multi_stream_commit_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store.append(vec![event(b, "b")], ExpectedVersion::NoStream).unwrap();

        let err = store
            .commit(vec![
                StreamAppend { aggregate_id: a, expected: ExpectedVersion::NoStream, events: vec![event(a, "a")] },
                // b is already at version 1.
                StreamAppend { aggregate_id: b, expected: ExpectedVersion::Exact(0), events: vec![event(b, "b")] },
            ])
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(a).unwrap().is_empty());
        assert_eq!(store.load_stream(b).unwrap().len(), 1);
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(id, "a")], ExpectedVersion::Any).unwrap();
        let err = store.append(vec![event(id, "b")], ExpectedVersion::Any).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn the_same_stream_twice_in_one_commit_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        let err = store
            .commit(vec![
                StreamAppend { aggregate_id: id, expected: ExpectedVersion::Any, events: vec![event(id, "a")] },
                StreamAppend { aggregate_id: id, expected: ExpectedVersion::Any, events: vec![event(id, "a")] },
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }
}
