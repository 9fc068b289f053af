use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, Clock, DomainError, ExpectedVersion, UserId};
use pharmledger_dispensing::{
    ApproveReturn, CloseReturn, CreateIncidentReport, Dispensing, DispensingCommand, DispensingId,
    DispensingStatus, DrugReturn, NotifySupplier, ProcessRefund, RecordItemReturn, RecordRestock,
    RejectReturn, RequestReturn, ReturnCommand, ReturnId, ReverseItemReturn,
};
use pharmledger_events::{EventBus, EventEnvelope};
use pharmledger_inventory::{BatchStore, MovementKind, MovementLog, MovementReference, ReferenceKind};

use super::{DISPENSING, PharmacyEngine, RETURN, log_followup_failure};
use crate::error::{EngineError, EngineResult};
use crate::event_store::EventStore;

fn drug_return(id: AggregateId) -> DrugReturn {
    DrugReturn::empty(ReturnId::new(id))
}

fn dispensing(id: AggregateId) -> Dispensing {
    Dispensing::empty(DispensingId::new(id))
}

impl<S, B, BS, ML, C> PharmacyEngine<S, B, BS, ML, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    BS: BatchStore,
    ML: MovementLog,
    C: Clock,
{
    pub fn drug_return(&self, return_id: ReturnId) -> EngineResult<DrugReturn> {
        self.load_existing(return_id.0, drug_return)
    }

    /// Open a return against a dispensed line. Drug and price are taken from
    /// the dispensing; the batch must be one the line was dispensed from.
    pub fn request_return(&self, mut cmd: RequestReturn) -> EngineResult<DrugReturn> {
        let dispensed = self.dispensing(cmd.dispensing_id)?;
        if dispensed.status() != DispensingStatus::Dispensed {
            return Err(DomainError::invalid_state("only dispensed items can be returned").into());
        }
        let item = dispensed.item(cmd.line_no).ok_or_else(DomainError::not_found)?;
        if !item.allocations.iter().any(|a| a.batch_id == cmd.batch_id) {
            return Err(DomainError::validation("line was not dispensed from this batch").into());
        }
        if cmd.quantity > item.returnable_quantity() {
            return Err(DomainError::validation(format!(
                "return of {} exceeds the {} unreturned units of line {}",
                cmd.quantity,
                item.returnable_quantity(),
                cmd.line_no
            ))
            .into());
        }
        if !self.return_policy.contains(&cmd.reason) {
            return Err(DomainError::validation(format!("unknown return reason '{}'", cmd.reason)).into());
        }
        cmd.drug_id = item.drug_id;
        cmd.unit_price = item.unit_price;

        let out = self.dispatch(RETURN, ReturnCommand::RequestReturn(cmd), ExpectedVersion::Exact(0), drug_return)?;
        info!(
            return_id = %out.aggregate.id_typed(),
            reason = %out.aggregate.reason(),
            quantity = out.aggregate.quantity(),
            "return requested"
        );
        Ok(out.aggregate)
    }

    /// Approve with the follow-up rules configured for the return's reason.
    /// The returned quantity is booked on the dispensing first, so two
    /// returns against one line can never both claim the same units.
    pub fn approve_return(&self, return_id: ReturnId, reviewed_by: UserId) -> EngineResult<DrugReturn> {
        let current = self.drug_return(return_id)?;
        let behavior = self.return_policy.behavior(current.reason())?;
        let approve = ReturnCommand::ApproveReturn(ApproveReturn {
            return_id,
            reviewed_by,
            behavior,
            occurred_at: self.clock.now(),
        });
        current.handle(&approve)?;

        let dispensing_id = current.dispensing_id();
        let line_no = current.line_no();
        let quantity = current.quantity();
        let occurred_at = self.clock.now();
        self.dispatch_with_retry(DISPENSING, dispensing, dispensing_id.0, |_| {
            DispensingCommand::RecordItemReturn(RecordItemReturn {
                dispensing_id,
                line_no,
                quantity,
                occurred_at,
            })
        })?;

        let approved = match self.dispatch(RETURN, approve, ExpectedVersion::Exact(current.version()), drug_return) {
            Ok(out) => out,
            Err(e) => {
                self.reverse_item_return(dispensing_id, line_no, quantity);
                return Err(e);
            }
        };
        info!(
            %return_id,
            pharmacy_error = behavior.is_pharmacy_error,
            restockable = behavior.can_restock,
            pending = ?approved.aggregate.pending_steps(),
            "return approved"
        );
        Ok(approved.aggregate)
    }

    fn reverse_item_return(&self, dispensing_id: DispensingId, line_no: u32, quantity: i64) {
        let occurred_at = self.clock.now();
        let reversed = self.dispatch_with_retry(DISPENSING, dispensing, dispensing_id.0, |_| {
            DispensingCommand::ReverseItemReturn(ReverseItemReturn {
                dispensing_id,
                line_no,
                quantity,
                occurred_at,
            })
        });
        if let Err(e) = reversed {
            log_followup_failure("item return reversal", &e);
        }
    }

    /// Put the returned units back on their batch. Refused for reasons that
    /// do not allow restocking and for returns already restocked.
    pub fn restock_return(&self, return_id: ReturnId, handled_by: UserId) -> EngineResult<DrugReturn> {
        let current = self.drug_return(return_id)?;
        let at = self.clock.now();
        let movement_id = Uuid::now_v7();
        let out = self.dispatch(
            RETURN,
            ReturnCommand::RecordRestock(RecordRestock {
                return_id,
                handled_by,
                movement_id,
                occurred_at: at,
            }),
            ExpectedVersion::Exact(current.version()),
            drug_return,
        )?;

        let reference = MovementReference::new(ReferenceKind::Return, return_id);
        if let Err(e) = self.ledger.add_quantity_with_id(
            movement_id,
            current.batch_id(),
            current.quantity(),
            MovementKind::Return,
            reference,
            at,
        ) {
            let err = EngineError::from(e);
            log_followup_failure("return restock", &err);
            return Err(err);
        }
        info!(
            %return_id,
            %movement_id,
            batch_id = %current.batch_id(),
            quantity = current.quantity(),
            "return restocked"
        );
        Ok(out.aggregate)
    }

    pub fn reject_return(&self, cmd: RejectReturn) -> EngineResult<DrugReturn> {
        self.return_command(ReturnCommand::RejectReturn(cmd))
    }

    pub fn process_refund(&self, cmd: ProcessRefund) -> EngineResult<DrugReturn> {
        self.return_command(ReturnCommand::ProcessRefund(cmd))
    }

    /// Record the supplier notification. Without an explicit supplier the
    /// batch's supplier is used.
    pub fn notify_supplier(&self, mut cmd: NotifySupplier) -> EngineResult<DrugReturn> {
        if cmd.supplier_id.is_none() {
            let current = self.drug_return(cmd.return_id)?;
            cmd.supplier_id = self
                .ledger
                .batch(current.batch_id(), self.clock.today())?
                .value
                .supplier_id();
        }
        self.return_command(ReturnCommand::NotifySupplier(cmd))
    }

    pub fn create_incident_report(&self, cmd: CreateIncidentReport) -> EngineResult<DrugReturn> {
        self.return_command(ReturnCommand::CreateIncidentReport(cmd))
    }

    pub fn close_return(&self, cmd: CloseReturn) -> EngineResult<DrugReturn> {
        self.return_command(ReturnCommand::CloseReturn(cmd))
    }

    fn return_command(&self, command: ReturnCommand) -> EngineResult<DrugReturn> {
        let out = self.dispatch(RETURN, command, ExpectedVersion::Any, drug_return)?;
        if !out.events.is_empty() {
            info!(
                return_id = %out.aggregate.id_typed(),
                status = ?out.aggregate.status(),
                "return updated"
            );
        }
        Ok(out.aggregate)
    }
}
