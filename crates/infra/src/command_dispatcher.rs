//! Command execution pipeline for the event-sourced workflow aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate's stream
//!   ↓
//! 2. Rehydrate (apply history in sequence order)
//!   ↓
//! 3. Check the caller's expected version, then handle (pure decision)
//!   ↓
//! 4. Append with the loaded version as expectation
//!   ↓
//! 5. Publish the committed events
//! ```
//!
//! This module contains no IO itself; it composes the `EventStore` and
//! `EventBus` traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use pharmledger_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use pharmledger_events::{Command, EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Business rule failure, or a stale version (`ConcurrencyConflict`).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A stored payload no longer deserializes into the aggregate's events.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful append; the events are stored.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Domain(DomainError::concurrency(msg)),
            other => DispatchError::Store(other),
        }
    }
}

impl DispatchError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DispatchError::Domain(e) if e.is_retryable())
    }
}

/// Outcome of a committed command.
#[derive(Debug, Clone)]
pub struct Dispatched<A: Aggregate> {
    /// State after the new events were applied.
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Events are appended before they are published; if the append fails
/// nothing is published. A publish failure is reported but the events stay
/// committed (at-least-once delivery, consumers must be idempotent).
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

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream. A missing stream yields the
    /// empty aggregate at version 0.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch against whatever version is current.
    pub fn dispatch<A>(
        &self,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: pharmledger_events::Event + Serialize + DeserializeOwned,
    {
        self.dispatch_expecting(aggregate_type, command, ExpectedVersion::Any, make_aggregate)
    }

    /// Dispatch only if the aggregate is still at `expected`.
    ///
    /// Callers that decided on side effects from a previously loaded state
    /// pass that state's version so a concurrent change surfaces as
    /// `ConcurrencyConflict` instead of being overwritten.
    pub fn dispatch_expecting<A>(
        &self,
        aggregate_type: &str,
        command: A::Command,
        expected: ExpectedVersion,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: pharmledger_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_id = command.target_aggregate_id();

        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let current = stream_version(&history);
        expected.check(current)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                events: vec![],
                committed: vec![],
            });
        }

        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, ExpectedVersion::Exact(current))?;
        for ev in &decided {
            aggregate.apply(ev);
        }
        debug!(
            %aggregate_id,
            aggregate_type,
            events = committed.len(),
            version = current + committed.len() as u64,
            "events committed"
        );

        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched {
            aggregate,
            events: decided,
            committed,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pharmledger_catalog::{
        ControlFlags, Drug, DrugCommand, DrugId, FormularyStatus, RegisterDrug, StockThresholds,
        UpdateStockThresholds,
    };
    use pharmledger_core::AggregateRoot;
    use pharmledger_events::InMemoryEventBus;

    use crate::event_store::InMemoryEventStore;

    type Dispatcher = CommandDispatcher<InMemoryEventStore, InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn register(drug_id: DrugId) -> DrugCommand {
        DrugCommand::RegisterDrug(RegisterDrug {
            drug_id,
            code: "AMX500".into(),
            generic_name: "amoxicillin".into(),
            brand_name: None,
            strength: "500 mg".into(),
            unit: "capsule".into(),
            category_id: None,
            thresholds: StockThresholds::new(10, 100, 50).unwrap(),
            controls: ControlFlags::default(),
            formulary_status: FormularyStatus::Formulary,
            occurred_at: Utc::now(),
        })
    }

    fn thresholds(drug_id: DrugId, minimum: i64) -> DrugCommand {
        DrugCommand::UpdateStockThresholds(UpdateStockThresholds {
            drug_id,
            thresholds: StockThresholds::new(minimum, 100, 50).unwrap(),
            occurred_at: Utc::now(),
        })
    }

    fn make(id: AggregateId) -> Drug {
        Drug::empty(DrugId::new(id))
    }

    #[test]
    fn dispatch_commits_publishes_and_returns_new_state() {
        let dispatcher = Dispatcher::new(InMemoryEventStore::new(), InMemoryEventBus::new());
        let sub = dispatcher.bus().subscribe();
        let drug_id = DrugId::generate();

        let out = dispatcher.dispatch("catalog.drug", register(drug_id), make).unwrap();
        assert_eq!(out.committed.len(), 1);
        assert_eq!(out.aggregate.version(), 1);

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "catalog.drug.registered");

        let loaded = dispatcher.load(drug_id.0, make).unwrap();
        assert_eq!(loaded, out.aggregate);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_conflict() {
        let dispatcher = Dispatcher::new(InMemoryEventStore::new(), InMemoryEventBus::new());
        let drug_id = DrugId::generate();
        dispatcher.dispatch("catalog.drug", register(drug_id), make).unwrap();
        dispatcher
            .dispatch_expecting("catalog.drug", thresholds(drug_id, 5), ExpectedVersion::Exact(1), make)
            .unwrap();

        let err = dispatcher
            .dispatch_expecting("catalog.drug", thresholds(drug_id, 7), ExpectedVersion::Exact(1), make)
            .unwrap_err();
        assert!(err.is_concurrency_conflict());
        assert_eq!(dispatcher.store().load_stream(drug_id.0).unwrap().len(), 2);
    }

    #[test]
    fn rejected_command_writes_nothing() {
        let dispatcher = Dispatcher::new(InMemoryEventStore::new(), InMemoryEventBus::new());
        let drug_id = DrugId::generate();

        let err = dispatcher.dispatch("catalog.drug", thresholds(drug_id, 5), make).unwrap_err();
        assert!(matches!(err, DispatchError::Domain(DomainError::NotFound)));
        assert_eq!(dispatcher.store().event_count(), 0);
    }
}
