//! Dispensing workflow: prescription claims, FEFO reservation, hand-over.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use pharmledger_catalog::{DrugCatalog, DrugId};
use pharmledger_core::{AggregateId, AggregateRoot, Clock, DomainError, ExpectedVersion, UserId};
use pharmledger_dispensing::{
    CancelDispensing, CompleteCounseling, CreateDispensing, Dispense, Dispensing, DispensingCommand,
    DispensingEvent, DispensingId, DispensingStatus, ItemAllocation, PutOnHold, ResumeDispensing,
    StartPreparing, SubmitForVerification, SubstituteItem, VerifyDispensing,
};
use pharmledger_events::{EventBus, EventEnvelope};
use pharmledger_inventory::{
    AllocationLine, AllocationRequest, BatchStore, FulfillmentPolicy, MovementKind, MovementLog,
    MovementReference, ReferenceKind,
};
use pharmledger_prescribing::LineQuantity;

use super::{DISPENSING, PharmacyEngine, log_followup_failure};
use crate::error::{EngineError, EngineResult};
use crate::event_store::EventStore;

fn dispensing(id: AggregateId) -> Dispensing {
    Dispensing::empty(DispensingId::new(id))
}

/// Swap a line's drug for a therapeutic equivalent during preparation.
/// Stock for the substitute is allocated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRequest {
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub substitute_drug_id: DrugId,
    pub reason: String,
    pub unit_price: i64,
}

impl<S, B, BS, ML, C> PharmacyEngine<S, B, BS, ML, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    BS: BatchStore,
    ML: MovementLog,
    C: Clock,
{
    pub fn dispensing(&self, dispensing_id: DispensingId) -> EngineResult<Dispensing> {
        self.load_existing(dispensing_id.0, dispensing)
    }

    /// Open a dispensing against a verified prescription.
    ///
    /// The requested line quantities are claimed on the prescription first;
    /// the claim is released again if the dispensing cannot be created.
    pub fn create_dispensing(&self, mut cmd: CreateDispensing) -> EngineResult<Dispensing> {
        let prescription = self.prescription(cmd.prescription_id)?;
        if !prescription.is_dispensable(self.clock.now()) {
            return Err(DomainError::invalid_state(format!(
                "prescription is {:?} and cannot be dispensed",
                prescription.status()
            ))
            .into());
        }
        if prescription.patient_id() != cmd.patient_id {
            return Err(DomainError::validation("dispensing patient does not match the prescription").into());
        }

        for item in &mut cmd.items {
            let prescribed = prescription.item(item.line_no).ok_or_else(DomainError::not_found)?;
            if prescribed.drug_id != item.drug_id {
                return Err(DomainError::validation(format!(
                    "line {} is prescribed as a different drug",
                    item.line_no
                ))
                .into());
            }
            item.requires_dual_check = prescribed.requires_dual_check;
        }
        cmd.counseling_for_dual_check_items = self.config.dispensing.counseling_for_controlled;
        cmd.allow_partial = cmd.allow_partial && self.config.dispensing.allow_partial;

        let prescription_id = cmd.prescription_id;
        let dispensing_id = cmd.dispensing_id;
        let lines = cmd
            .items
            .iter()
            .map(|i| LineQuantity {
                line_no: i.line_no,
                quantity: i.quantity,
            })
            .collect();
        self.claim_prescription_items(prescription_id, dispensing_id.0, lines)?;

        match self.dispatch(
            DISPENSING,
            DispensingCommand::CreateDispensing(cmd),
            ExpectedVersion::Exact(0),
            dispensing,
        ) {
            Ok(out) => {
                info!(
                    %dispensing_id,
                    %prescription_id,
                    counseling_required = out.aggregate.counseling_required(),
                    "dispensing queued"
                );
                Ok(out.aggregate)
            }
            Err(e) => {
                if let Err(release) = self.release_prescription_claim(prescription_id, dispensing_id.0) {
                    log_followup_failure("prescription claim release", &release);
                }
                Err(e)
            }
        }
    }

    /// Reserve stock for every line, soonest expiry first, and start
    /// preparation. Nothing stays reserved if the step is refused.
    pub fn start_preparing(&self, dispensing_id: DispensingId, prepared_by: UserId) -> EngineResult<Dispensing> {
        let current = self.dispensing(dispensing_id)?;
        if current.status() != DispensingStatus::Queue {
            return Err(DomainError::invalid_state(format!(
                "dispensing is {:?}, preparation starts from the queue",
                current.status()
            ))
            .into());
        }

        let policy = self.fulfillment_policy(&current);
        let today = self.clock.today();
        let mut allocations = Vec::with_capacity(current.items().len());
        let mut reserved: Vec<AllocationLine> = Vec::new();
        for item in current.items() {
            let request = AllocationRequest {
                drug_id: item.drug_id,
                location_id: current.location_id(),
                quantity: item.prescribed_quantity,
                policy,
            };
            match self.ledger.allocate(&request, today) {
                Ok(allocation) => {
                    reserved.extend(allocation.lines.iter().cloned());
                    allocations.push(ItemAllocation {
                        line_no: item.line_no,
                        lines: allocation.lines,
                    });
                }
                Err(e) => {
                    self.release_reserved(&reserved);
                    return Err(e.into());
                }
            }
        }

        let command = DispensingCommand::StartPreparing(StartPreparing {
            dispensing_id,
            prepared_by,
            allocations,
            occurred_at: self.clock.now(),
        });
        match self.dispatch(DISPENSING, command, ExpectedVersion::Exact(current.version()), dispensing) {
            Ok(out) => {
                info!(
                    %dispensing_id,
                    partial = out.aggregate.is_partial(),
                    quantity = out.aggregate.totals().total_quantity,
                    "dispensing preparation started"
                );
                Ok(out.aggregate)
            }
            Err(e) => {
                self.release_reserved(&reserved);
                Err(e)
            }
        }
    }

    pub fn submit_for_verification(&self, dispensing_id: DispensingId) -> EngineResult<Dispensing> {
        let command = DispensingCommand::SubmitForVerification(SubmitForVerification {
            dispensing_id,
            occurred_at: self.clock.now(),
        });
        Ok(self.dispatch(DISPENSING, command, ExpectedVersion::Any, dispensing)?.aggregate)
    }

    pub fn verify_dispensing(&self, cmd: VerifyDispensing) -> EngineResult<Dispensing> {
        let out = self.dispatch(
            DISPENSING,
            DispensingCommand::VerifyDispensing(cmd),
            ExpectedVersion::Any,
            dispensing,
        )?;
        info!(
            dispensing_id = %out.aggregate.id_typed(),
            status = ?out.aggregate.status(),
            "dispensing checked"
        );
        Ok(out.aggregate)
    }

    /// Replace a line's drug with an active therapeutic equivalent. The
    /// substitute's stock is reserved before the swap is recorded; the
    /// original reservation is released after.
    pub fn substitute_item(&self, request: SubstitutionRequest) -> EngineResult<Dispensing> {
        let current = self.dispensing(request.dispensing_id)?;
        if current.status() != DispensingStatus::Preparing {
            return Err(DomainError::invalid_state("items are substituted during preparation").into());
        }
        let item = current.item(request.line_no).ok_or_else(DomainError::not_found)?;
        let original = self.catalog.require_drug(item.drug_id)?;
        let substitute = self.catalog.require_drug(request.substitute_drug_id)?;
        if !substitute.is_active() {
            return Err(DomainError::invalid_state(format!(
                "drug {} is discontinued",
                substitute.code()
            ))
            .into());
        }
        if !original.is_equivalent_to(&substitute) {
            return Err(DomainError::validation(format!(
                "{} is not a therapeutic equivalent of {}",
                substitute.code(),
                original.code()
            ))
            .into());
        }

        let allocation = self.ledger.allocate(
            &AllocationRequest {
                drug_id: substitute.id_typed(),
                location_id: current.location_id(),
                quantity: item.prescribed_quantity,
                policy: self.fulfillment_policy(&current),
            },
            self.clock.today(),
        )?;

        let command = DispensingCommand::SubstituteItem(SubstituteItem {
            dispensing_id: request.dispensing_id,
            line_no: request.line_no,
            substitute_drug_id: request.substitute_drug_id,
            reason: request.reason,
            unit_price: request.unit_price,
            allocation: allocation.lines.clone(),
            occurred_at: self.clock.now(),
        });
        let out = match self.dispatch(DISPENSING, command, ExpectedVersion::Exact(current.version()), dispensing) {
            Ok(out) => out,
            Err(e) => {
                self.release_reserved(&allocation.lines);
                return Err(e);
            }
        };

        for event in &out.events {
            if let DispensingEvent::ItemSubstituted(e) = event {
                self.release_reserved(&e.released);
                info!(
                    dispensing_id = %e.dispensing_id,
                    line_no = e.line_no,
                    original = %e.original_drug_id,
                    substitute = %e.substitute_drug_id,
                    "item substituted"
                );
            }
        }
        Ok(out.aggregate)
    }

    pub fn complete_counseling(&self, cmd: CompleteCounseling) -> EngineResult<Dispensing> {
        let out = self.dispatch(
            DISPENSING,
            DispensingCommand::CompleteCounseling(cmd),
            ExpectedVersion::Any,
            dispensing,
        )?;
        Ok(out.aggregate)
    }

    /// Hand the prepared items over: consume the reserved stock and settle
    /// the prescription claim with the quantities actually dispensed.
    pub fn dispense(&self, cmd: Dispense) -> EngineResult<Dispensing> {
        let dispensing_id = cmd.dispensing_id;
        let pharmacist = cmd.pharmacist;
        let at = cmd.occurred_at;
        let out = self.dispatch(DISPENSING, DispensingCommand::Dispense(cmd), ExpectedVersion::Any, dispensing)?;

        let mut first_error: Option<EngineError> = None;
        for event in &out.events {
            if let DispensingEvent::DispensingCompleted(e) = event {
                let reference = MovementReference::new(ReferenceKind::Dispensing, dispensing_id);
                if let Err(err) = self
                    .ledger
                    .consume_allocation(&e.consumed, MovementKind::Dispensing, reference, at)
                {
                    let err = EngineError::from(err);
                    log_followup_failure("dispensed stock consumption", &err);
                    first_error.get_or_insert(err);
                }
            }
        }

        let dispensed = &out.aggregate;
        if let Err(err) = self.settle_prescription(
            dispensed.prescription_id(),
            dispensing_id.0,
            dispensed.dispensed_lines(),
            pharmacist,
        ) {
            log_followup_failure("prescription settlement", &err);
            first_error.get_or_insert(err);
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        let totals = dispensed.totals();
        info!(
            %dispensing_id,
            quantity = totals.total_quantity,
            total_amount = totals.total_amount,
            partial = dispensed.is_partial(),
            "dispensing completed"
        );
        Ok(out.aggregate)
    }

    pub fn put_on_hold(&self, dispensing_id: DispensingId, reason: &str) -> EngineResult<Dispensing> {
        let command = DispensingCommand::PutOnHold(PutOnHold {
            dispensing_id,
            reason: reason.to_string(),
            occurred_at: self.clock.now(),
        });
        let out = self.dispatch(DISPENSING, command, ExpectedVersion::Any, dispensing)?;
        info!(%dispensing_id, reason, "dispensing put on hold");
        Ok(out.aggregate)
    }

    pub fn resume_dispensing(&self, dispensing_id: DispensingId) -> EngineResult<Dispensing> {
        let command = DispensingCommand::ResumeDispensing(ResumeDispensing {
            dispensing_id,
            occurred_at: self.clock.now(),
        });
        Ok(self.dispatch(DISPENSING, command, ExpectedVersion::Any, dispensing)?.aggregate)
    }

    /// Cancel an open dispensing, releasing its reservations and its claim on
    /// the prescription.
    pub fn cancel_dispensing(&self, cmd: CancelDispensing) -> EngineResult<Dispensing> {
        let dispensing_id = cmd.dispensing_id;
        let out = self.dispatch(
            DISPENSING,
            DispensingCommand::CancelDispensing(cmd),
            ExpectedVersion::Any,
            dispensing,
        )?;

        let mut first_error: Option<EngineError> = None;
        for event in &out.events {
            if let DispensingEvent::DispensingCancelled(e) = event {
                if let Err(err) = self.ledger.release_allocation(&e.released) {
                    let err = EngineError::from(err);
                    log_followup_failure("cancelled dispensing release", &err);
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Err(err) = self.release_prescription_claim(out.aggregate.prescription_id(), dispensing_id.0) {
            log_followup_failure("prescription claim release", &err);
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(%dispensing_id, reason = out.aggregate.cancel_reason(), "dispensing cancelled");
                Ok(out.aggregate)
            }
        }
    }

    fn fulfillment_policy(&self, dispensing: &Dispensing) -> FulfillmentPolicy {
        if dispensing.allows_partial() {
            FulfillmentPolicy::AllowPartial
        } else {
            FulfillmentPolicy::RequireFull
        }
    }

    fn release_reserved(&self, lines: &[AllocationLine]) {
        if let Err(e) = self.ledger.release_allocation(lines) {
            log_followup_failure("reservation release", &EngineError::from(e));
        }
    }
}
