use serde_json::Value as JsonValue;
use tracing::info;

use pharmledger_catalog::DrugCatalog;
use pharmledger_core::{AggregateId, Clock, DomainError, ExpectedVersion, UserId};
use pharmledger_events::{EventBus, EventEnvelope};
use pharmledger_inventory::{BatchStore, MovementLog};
use pharmledger_prescribing::{
    ClaimItems, LineQuantity, MarkPrescriptionDispensed, Prescription, PrescriptionCommand,
    PrescriptionId, RecordDispensed, ReleaseClaim,
};

use super::{PRESCRIPTION, PharmacyEngine};
use crate::error::EngineResult;
use crate::event_store::EventStore;

pub(super) fn prescription(id: AggregateId) -> Prescription {
    Prescription::empty(PrescriptionId::new(id))
}

impl<S, B, BS, ML, C> PharmacyEngine<S, B, BS, ML, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    BS: BatchStore,
    ML: MovementLog,
    C: Clock,
{
    /// Run a prescriber or pharmacist command against a prescription.
    ///
    /// Item dual-check flags come from the catalog and the dual-verification
    /// switch from configuration; caller-supplied values are overridden.
    /// Claims and dispensed quantities are written by the dispensing workflow
    /// only.
    pub fn prescription_command(&self, command: PrescriptionCommand) -> EngineResult<Prescription> {
        let command = match command {
            PrescriptionCommand::AddPrescriptionItem(mut cmd) => {
                let drug = self.catalog.require_drug(cmd.drug_id)?;
                if !drug.is_active() {
                    return Err(DomainError::invalid_state(format!(
                        "drug {} is discontinued",
                        drug.code()
                    ))
                    .into());
                }
                cmd.requires_dual_check = drug.requires_dual_check();
                PrescriptionCommand::AddPrescriptionItem(cmd)
            }
            PrescriptionCommand::VerifyPrescription(mut cmd) => {
                cmd.dual_verification_enabled = self.config.prescriptions.dual_verification_for_controlled;
                PrescriptionCommand::VerifyPrescription(cmd)
            }
            PrescriptionCommand::ClaimItems(_)
            | PrescriptionCommand::ReleaseClaim(_)
            | PrescriptionCommand::RecordDispensed(_)
            | PrescriptionCommand::MarkPrescriptionDispensed(_) => {
                return Err(DomainError::invalid_state(
                    "dispensing bookkeeping is recorded by the dispensing workflow",
                )
                .into());
            }
            other => other,
        };

        let out = self.dispatch(PRESCRIPTION, command, ExpectedVersion::Any, prescription)?;
        if !out.events.is_empty() {
            info!(
                prescription_id = %out.aggregate.id_typed(),
                status = ?out.aggregate.status(),
                "prescription updated"
            );
        }
        Ok(out.aggregate)
    }

    pub fn prescription(&self, prescription_id: PrescriptionId) -> EngineResult<Prescription> {
        self.load_existing(prescription_id.0, prescription)
    }

    pub(super) fn claim_prescription_items(
        &self,
        prescription_id: PrescriptionId,
        dispensing_id: AggregateId,
        lines: Vec<LineQuantity>,
    ) -> EngineResult<Prescription> {
        let occurred_at = self.clock.now();
        let out = self.dispatch_with_retry(PRESCRIPTION, prescription, prescription_id.0, |_| {
            PrescriptionCommand::ClaimItems(ClaimItems {
                prescription_id,
                dispensing_id,
                lines: lines.clone(),
                occurred_at,
            })
        })?;
        Ok(out.aggregate)
    }

    pub(super) fn release_prescription_claim(
        &self,
        prescription_id: PrescriptionId,
        dispensing_id: AggregateId,
    ) -> EngineResult<Prescription> {
        let occurred_at = self.clock.now();
        let out = self.dispatch_with_retry(PRESCRIPTION, prescription, prescription_id.0, |_| {
            PrescriptionCommand::ReleaseClaim(ReleaseClaim {
                prescription_id,
                dispensing_id,
                occurred_at,
            })
        })?;
        Ok(out.aggregate)
    }

    /// Settle a dispensing's claim with the quantities handed out, and close
    /// the prescription once every item is fully dispensed.
    pub(super) fn settle_prescription(
        &self,
        prescription_id: PrescriptionId,
        dispensing_id: AggregateId,
        lines: Vec<LineQuantity>,
        pharmacist: UserId,
    ) -> EngineResult<Prescription> {
        let occurred_at = self.clock.now();
        let recorded = self.dispatch_with_retry(PRESCRIPTION, prescription, prescription_id.0, |_| {
            PrescriptionCommand::RecordDispensed(RecordDispensed {
                prescription_id,
                dispensing_id,
                lines: lines.clone(),
                occurred_at,
            })
        })?;
        if !recorded.aggregate.is_fully_dispensed() {
            return Ok(recorded.aggregate);
        }

        let closed = self.dispatch_with_retry(PRESCRIPTION, prescription, prescription_id.0, |_| {
            PrescriptionCommand::MarkPrescriptionDispensed(MarkPrescriptionDispensed {
                prescription_id,
                pharmacist,
                occurred_at,
            })
        })?;
        info!(%prescription_id, "prescription fully dispensed");
        Ok(closed.aggregate)
    }
}
