use serde_json::Value as JsonValue;
use tracing::info;

use pharmledger_catalog::{Drug, DrugCatalog, DrugCategory, DrugCommand, DrugId, Supplier};
use pharmledger_core::{Clock, DomainError, ExpectedVersion, Versioned};
use pharmledger_events::{EventBus, EventEnvelope};
use pharmledger_inventory::{BatchId, BatchStore, ExpiryAlert, MovementLog, StockBatch, StockLevel};

use super::{DRUG, PharmacyEngine};
use crate::error::EngineResult;
use crate::event_store::EventStore;

impl<S, B, BS, ML, C> PharmacyEngine<S, B, BS, ML, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    BS: BatchStore,
    ML: MovementLog,
    C: Clock,
{
    /// Run a drug command and fold its events into the catalog read model.
    pub fn drug_command(&self, command: DrugCommand) -> EngineResult<Drug> {
        if let DrugCommand::RegisterDrug(cmd) = &command {
            if self.catalog.code_in_use(&cmd.code) {
                return Err(DomainError::conflict(format!("drug code {} is already registered", cmd.code)).into());
            }
        }

        let out = self.dispatch(DRUG, command, ExpectedVersion::Any, |id| Drug::empty(DrugId::new(id)))?;
        for event in &out.events {
            self.catalog.apply(event)?;
        }
        if !out.events.is_empty() {
            info!(drug_id = %out.aggregate.id_typed(), code = out.aggregate.code(), "drug catalog updated");
        }
        Ok(out.aggregate)
    }

    pub fn register_category(&self, category: DrugCategory) -> EngineResult<()> {
        Ok(self.catalog.upsert_category(category)?)
    }

    pub fn register_supplier(&self, supplier: Supplier) -> EngineResult<()> {
        Ok(self.catalog.upsert_supplier(supplier)?)
    }

    /// Derived stock figures for a drug, classified against its thresholds.
    pub fn stock_level(&self, drug_id: DrugId) -> EngineResult<StockLevel> {
        let drug = self.catalog.require_drug(drug_id)?;
        Ok(self
            .ledger
            .stock_level(drug_id, &drug.thresholds(), self.clock.today()))
    }

    pub fn batches_for_drug(&self, drug_id: DrugId) -> Vec<StockBatch> {
        self.ledger.batches_for_drug(drug_id, self.clock.today())
    }

    /// Active batches expiring within the configured near-expiry window.
    pub fn expiring_stock(&self) -> Vec<ExpiryAlert> {
        self.ledger
            .expiring_within(self.clock.today(), self.config.inventory.near_expiry_days)
    }

    pub fn quarantine_batch(&self, batch_id: BatchId, reason: &str) -> EngineResult<Versioned<StockBatch>> {
        let batch = self.ledger.quarantine(batch_id, reason)?;
        info!(%batch_id, reason, "batch quarantined");
        Ok(batch)
    }

    pub fn release_batch_from_quarantine(&self, batch_id: BatchId) -> EngineResult<Versioned<StockBatch>> {
        let batch = self.ledger.release_from_quarantine(batch_id)?;
        info!(%batch_id, "batch released from quarantine");
        Ok(batch)
    }
}
