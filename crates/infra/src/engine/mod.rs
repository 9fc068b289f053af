//! `PharmacyEngine`: the application service that runs workflow commands
//! through the dispatcher and carries out their stock effects on the ledger.
//!
//! Ordering rules, per workflow step:
//! - stock is reserved *before* the step that records it is committed, and
//!   released again if that commit fails
//! - stock is consumed, credited or released *after* the step that decides
//!   it is committed, so a lost race never moves physical stock. Ids the
//!   movement needs (movement id, destination lot) are fixed before the commit
//! - a returned quantity is booked on its dispensing before the return is
//!   approved, and reversed if the approval then fails
//! - bookkeeping writes to a prescription or dispensing retry on concurrency
//!   conflicts
//!
//! Workflow commands that depend on a loaded state are dispatched with that
//! state's version as expectation.

mod catalog;
mod dispensing;
mod prescriptions;
mod receiving;
mod returns;

pub use dispensing::SubstitutionRequest;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

use pharmledger_catalog::InMemoryDrugCatalog;
use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, Clock, DomainError, ExpectedVersion};
use pharmledger_dispensing::ReturnPolicyTable;
use pharmledger_events::{Command, EventBus, EventEnvelope, InMemoryEventBus};
use pharmledger_inventory::{
    BatchStore, InMemoryBatchStore, InMemoryMovementLog, MovementLog, StockBatchLedger,
};

use crate::command_dispatcher::{CommandDispatcher, Dispatched};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::event_store::{EventStore, InMemoryEventStore};

pub(crate) const DRUG: &str = "catalog.drug";
pub(crate) const RECEIPT: &str = "inventory.receipt";
pub(crate) const TRANSFER: &str = "inventory.transfer";
pub(crate) const ADJUSTMENT: &str = "inventory.adjustment";
pub(crate) const PRESCRIPTION: &str = "prescribing.prescription";
pub(crate) const DISPENSING: &str = "dispensing.dispensing";
pub(crate) const RETURN: &str = "dispensing.return";

pub struct PharmacyEngine<S, B, BS, ML, C> {
    dispatcher: CommandDispatcher<S, B>,
    ledger: StockBatchLedger<BS, ML>,
    catalog: InMemoryDrugCatalog,
    return_policy: ReturnPolicyTable,
    config: EngineConfig,
    clock: C,
}

/// Engine over the in-memory store, bus, batch store and movement log.
pub type InMemoryPharmacyEngine<C> = PharmacyEngine<
    InMemoryEventStore,
    InMemoryEventBus<EventEnvelope<JsonValue>>,
    InMemoryBatchStore,
    InMemoryMovementLog,
    C,
>;

impl<C: Clock> InMemoryPharmacyEngine<C> {
    pub fn in_memory(config: EngineConfig, return_policy: ReturnPolicyTable, clock: C) -> Self {
        PharmacyEngine::new(
            InMemoryEventStore::new(),
            InMemoryEventBus::new(),
            InMemoryBatchStore::new(),
            InMemoryMovementLog::new(),
            config,
            return_policy,
            clock,
        )
    }
}

impl<S, B, BS, ML, C> PharmacyEngine<S, B, BS, ML, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    BS: BatchStore,
    ML: MovementLog,
    C: Clock,
{
    pub fn new(
        store: S,
        bus: B,
        batches: BS,
        movements: ML,
        config: EngineConfig,
        return_policy: ReturnPolicyTable,
        clock: C,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            ledger: StockBatchLedger::with_config(batches, movements, config.ledger),
            catalog: InMemoryDrugCatalog::new(),
            return_policy,
            config,
            clock,
        }
    }

    pub fn ledger(&self) -> &StockBatchLedger<BS, ML> {
        &self.ledger
    }

    pub fn catalog(&self) -> &InMemoryDrugCatalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn return_policy(&self) -> &ReturnPolicyTable {
        &self.return_policy
    }

    fn load<A>(&self, aggregate_id: AggregateId, make: impl FnOnce(AggregateId) -> A) -> EngineResult<A>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        Ok(self.dispatcher.load(aggregate_id, make)?)
    }

    /// Load an aggregate that must already exist.
    fn load_existing<A>(
        &self,
        aggregate_id: AggregateId,
        make: impl FnOnce(AggregateId) -> A,
    ) -> EngineResult<A>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let aggregate = self.load(aggregate_id, make)?;
        if aggregate.version() == 0 {
            return Err(DomainError::not_found().into());
        }
        Ok(aggregate)
    }

    fn dispatch<A>(
        &self,
        aggregate_type: &str,
        command: A::Command,
        expected: ExpectedVersion,
        make: impl FnOnce(AggregateId) -> A,
    ) -> EngineResult<Dispatched<A>>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: pharmledger_events::Event + Serialize + DeserializeOwned,
    {
        Ok(self
            .dispatcher
            .dispatch_expecting(aggregate_type, command, expected, make)?)
    }

    /// Dispatch a bookkeeping command, retrying on concurrency conflicts.
    /// `build` is re-run against fresh state on every attempt.
    fn dispatch_with_retry<A>(
        &self,
        aggregate_type: &str,
        make: impl Fn(AggregateId) -> A,
        aggregate_id: AggregateId,
        build: impl Fn(&A) -> A::Command,
    ) -> EngineResult<Dispatched<A>>
    where
        A: Aggregate<Error = DomainError>,
        A::Command: Command,
        A::Event: pharmledger_events::Event + Serialize + DeserializeOwned,
    {
        let attempts = self.config.prescriptions.write_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            let current = self.load(aggregate_id, &make)?;
            let command = build(&current);
            match self.dispatch(aggregate_type, command, ExpectedVersion::Exact(current.version()), &make) {
                Err(e) if e.is_concurrency_conflict() && attempt < attempts => {
                    warn!(%aggregate_id, aggregate_type, attempt, "write conflict, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Report a step that failed after its workflow event was committed.
pub(crate) fn log_followup_failure(context: &str, error: &EngineError) {
    tracing::error!(context, error = %error, "follow-up step failed after commit");
}
