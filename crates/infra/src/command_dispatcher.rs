//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command(s)
//!   ↓
//! 1. Load each aggregate's stream and rehydrate it
//!   ↓
//! 2. Handle commands inside a UnitOfWork (pure decisions, applied in memory)
//!   ↓
//! 3. Commit every touched stream at once, each at the version it was loaded at
//!   ↓
//! 4. Publish committed events to the bus
//! ```
//!
//! Nothing reaches the store until `commit`, so a command that fails halfway
//! through a unit of work leaves no trace: the caller just drops the unit.
//! If any stream moved since it was loaded, the whole commit is rejected with
//! `DispatchError::Concurrency` and the caller reloads and decides again.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use retailpos_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, StockShortfall};
use retailpos_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (a stream moved since it was loaded).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("insufficient stock: {0}")]
    InsufficientStock(StockShortfall),
    /// Historical payloads didn't deserialize into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful commit (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
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
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::InvalidState(msg) => DispatchError::InvalidState(msg),
            DomainError::NotFound(msg) => DispatchError::NotFound(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::Unauthorized => DispatchError::Unauthorized,
            DomainError::InsufficientStock(s) => DispatchError::InsufficientStock(s),
        }
    }
}

/// A rehydrated aggregate together with the stream version it was read at.
#[derive(Debug, Clone)]
pub struct Loaded<A> {
    aggregate: A,
    aggregate_id: AggregateId,
    loaded_version: u64,
}

impl<A> Loaded<A> {
    pub fn state(&self) -> &A {
        &self.aggregate
    }

    pub fn into_state(self) -> A {
        self.aggregate
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn loaded_version(&self) -> u64 {
        self.loaded_version
    }
}

/// Pending events for several aggregates, committed together or not at all.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    appends: Vec<StreamAppend>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.appends.iter().all(|a| a.events.is_empty())
    }

    pub fn touched_streams(&self) -> usize {
        self.appends.len()
    }

    /// Decide with `command` against the loaded aggregate, apply the resulting
    /// events in memory and stage them for commit.
    ///
    /// Several commands may run against the same aggregate; later ones see the
    /// effects of earlier ones, and the stream is still checked against the
    /// version it was originally loaded at.
    pub fn execute<A>(&mut self, loaded: &mut Loaded<A>, command: A::Command) -> Result<Vec<A::Event>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: retailpos_events::Event + Serialize,
    {
        let decided = loaded.aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(decided);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(loaded.aggregate_id, A::AGGREGATE_TYPE, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        for ev in &decided {
            loaded.aggregate.apply(ev);
        }

        match self.appends.iter_mut().find(|a| a.aggregate_id == loaded.aggregate_id) {
            Some(pending) => pending.events.extend(uncommitted),
            None => self.appends.push(StreamAppend {
                aggregate_id: loaded.aggregate_id,
                expected: ExpectedVersion::Exact(loaded.loaded_version),
                events: uncommitted,
            }),
        }

        Ok(decided)
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Generic over the store and bus so tests run on the in-memory versions and a
/// durable backend can be slotted in without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate one aggregate.
    pub fn load<A>(&self, aggregate_id: AggregateId, make_aggregate: impl FnOnce(AggregateId) -> A) -> Result<Loaded<A>, DispatchError>
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
            aggregate_id,
            loaded_version: stream_version(&history),
        })
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::new()
    }

    /// Commit a unit of work, then publish what was committed.
    pub fn commit(&self, unit: UnitOfWork) -> Result<Vec<StoredEvent>, DispatchError> {
        if unit.is_empty() {
            return Ok(vec![]);
        }

        let committed = self.store.commit(unit.appends)?;

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Single-aggregate shortcut: load, handle, commit, publish.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: retailpos_events::Event + Serialize + DeserializeOwned,
    {
        let mut loaded = self.load(aggregate_id, make_aggregate)?;
        let mut unit = self.begin();
        unit.execute(&mut loaded, command)?;
        self.commit(unit)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    // A buggy backend must not leak another stream into this aggregate.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
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
