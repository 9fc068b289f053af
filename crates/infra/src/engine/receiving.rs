//! Receipts, transfers and adjustments: the workflows that change stock
//! outside of dispensing.

use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use pharmledger_core::{
    Aggregate, AggregateId, AggregateRoot, Clock, DomainError, DomainResult, ExpectedVersion,
};
use pharmledger_events::{EventBus, EventEnvelope};
use pharmledger_inventory::{
    AdjustmentCommand, AdjustmentId, AdjustmentStatus, ApproveAdjustment, ApproveReceipt, BatchStore,
    CancelTransfer, DispatchTransfer, MarkAdjustmentApplied, MarkReceiptPosted, MovementKind, MovementLog,
    MovementReference, ReceiptCommand, ReceiptId, ReceiptStatus, ReceiveTransfer, ReferenceKind,
    StockAdjustment, StockReceipt, StockTransfer, TransferCommand, TransferEvent, TransferId,
    TransferItem, TransferStatus,
};

use super::{ADJUSTMENT, PharmacyEngine, RECEIPT, TRANSFER, log_followup_failure};
use crate::error::{EngineError, EngineResult};
use crate::event_store::EventStore;

fn receipt(id: AggregateId) -> StockReceipt {
    StockReceipt::empty(ReceiptId::new(id))
}

fn transfer(id: AggregateId) -> StockTransfer {
    StockTransfer::empty(TransferId::new(id))
}

fn adjustment(id: AggregateId) -> StockAdjustment {
    StockAdjustment::empty(AdjustmentId::new(id))
}

impl<S, B, BS, ML, C> PharmacyEngine<S, B, BS, ML, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    BS: BatchStore,
    ML: MovementLog,
    C: Clock,
{
    /// Run a receipt command. Approval posts every line to stock.
    pub fn receipt_command(&self, command: ReceiptCommand) -> EngineResult<StockReceipt> {
        match command {
            ReceiptCommand::ApproveReceipt(cmd) => self.approve_receipt(cmd),
            ReceiptCommand::MarkReceiptPosted(_) => {
                Err(DomainError::invalid_state("receipts are posted when they are approved").into())
            }
            other => Ok(self.dispatch(RECEIPT, other, ExpectedVersion::Any, receipt)?.aggregate),
        }
    }

    fn approve_receipt(&self, cmd: ApproveReceipt) -> EngineResult<StockReceipt> {
        let current = self.load_existing(cmd.receipt_id.0, receipt)?;
        for incoming in current.incoming_stock() {
            self.ledger.check_incoming(&incoming)?;
        }
        let approved = self.dispatch(
            RECEIPT,
            ReceiptCommand::ApproveReceipt(cmd),
            ExpectedVersion::Exact(current.version()),
            receipt,
        )?;
        self.post_receipt(approved.aggregate.id_typed())
    }

    /// Post an approved receipt's lines to stock. The posting, with the batch
    /// each line lands in, is committed before any stock moves.
    pub fn post_receipt(&self, receipt_id: ReceiptId) -> EngineResult<StockReceipt> {
        let current = self.load_existing(receipt_id.0, receipt)?;
        if current.status() != ReceiptStatus::Approved {
            return Err(DomainError::invalid_state(format!(
                "receipt is {:?}, only approved receipts are posted",
                current.status()
            ))
            .into());
        }

        let incoming = current.incoming_stock();
        let batch_ids = incoming
            .iter()
            .map(|stock| self.ledger.check_incoming(stock))
            .collect::<DomainResult<Vec<_>>>()?;
        let at = self.clock.now();
        let posted = self.dispatch(
            RECEIPT,
            ReceiptCommand::MarkReceiptPosted(MarkReceiptPosted {
                receipt_id,
                batch_ids: batch_ids.clone(),
                occurred_at: at,
            }),
            ExpectedVersion::Exact(current.version()),
            receipt,
        )?;

        let reference = MovementReference::new(ReferenceKind::Receipt, receipt_id);
        for (posted_lines, (stock, planned)) in incoming.iter().zip(&batch_ids).enumerate() {
            match self.ledger.receive(stock, MovementKind::Receipt, reference, at) {
                Ok(received) if received.batch_id != *planned => {
                    warn!(
                        %receipt_id,
                        %planned,
                        actual = %received.batch_id,
                        "receipt line landed in another batch"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    let err = EngineError::from(DomainError::invariant(format!(
                        "receipt {receipt_id} partly posted ({posted_lines} of {} lines): {e}",
                        incoming.len()
                    )));
                    log_followup_failure("receipt posting", &err);
                    return Err(err);
                }
            }
        }
        info!(
            %receipt_id,
            lines = posted.aggregate.items().len(),
            value = posted.aggregate.total_value(),
            "receipt posted to stock"
        );
        Ok(posted.aggregate)
    }

    /// Run a transfer command. Dispatch reserves at the source, receipt moves
    /// the stock, cancelling an in-transit transfer releases it.
    pub fn transfer_command(&self, command: TransferCommand) -> EngineResult<StockTransfer> {
        match command {
            TransferCommand::AddTransferItem(cmd) => {
                let current = self.load_existing(cmd.transfer_id.0, transfer)?;
                let batch = self.ledger.batch(cmd.batch_id, self.clock.today())?.value;
                if batch.location_id() != current.from_location() {
                    return Err(DomainError::validation("batch is not stocked at the transfer source").into());
                }
                if batch.drug_id() != cmd.drug_id {
                    return Err(DomainError::validation("batch holds a different drug").into());
                }
                let out = self.dispatch(
                    TRANSFER,
                    TransferCommand::AddTransferItem(cmd),
                    ExpectedVersion::Exact(current.version()),
                    transfer,
                )?;
                Ok(out.aggregate)
            }
            TransferCommand::DispatchTransfer(cmd) => self.dispatch_transfer(cmd),
            TransferCommand::ReceiveTransfer(cmd) => self.receive_transfer(cmd),
            TransferCommand::CancelTransfer(cmd) => self.cancel_transfer(cmd),
            other => Ok(self.dispatch(TRANSFER, other, ExpectedVersion::Any, transfer)?.aggregate),
        }
    }

    fn dispatch_transfer(&self, cmd: DispatchTransfer) -> EngineResult<StockTransfer> {
        let current = self.load_existing(cmd.transfer_id.0, transfer)?;
        let command = TransferCommand::DispatchTransfer(cmd);
        current.handle(&command)?;

        let mut reserved: Vec<&TransferItem> = Vec::new();
        for item in current.items() {
            if let Err(e) = self.ledger.reserve(item.batch_id, item.quantity) {
                self.release_transfer_items(&reserved);
                return Err(e.into());
            }
            reserved.push(item);
        }

        match self.dispatch(TRANSFER, command, ExpectedVersion::Exact(current.version()), transfer) {
            Ok(out) => {
                info!(transfer_id = %out.aggregate.id_typed(), lines = reserved.len(), "transfer dispatched");
                Ok(out.aggregate)
            }
            Err(e) => {
                self.release_transfer_items(&reserved);
                Err(e)
            }
        }
    }

    /// Commit the receipt against the in-transit state, then move the
    /// reserved stock out of the source and into the destination lots.
    fn receive_transfer(&self, cmd: ReceiveTransfer) -> EngineResult<StockTransfer> {
        let current = self.load_existing(cmd.transfer_id.0, transfer)?;
        if current.status() != TransferStatus::InTransit {
            return Err(DomainError::invalid_state(format!(
                "transfer is {:?}, only in-transit transfers can be received",
                current.status()
            ))
            .into());
        }

        let today = self.clock.today();
        let destination = current.to_location();
        let mut sources = Vec::with_capacity(current.items().len());
        let mut destination_batches = Vec::with_capacity(current.items().len());
        for item in current.items() {
            let source = self.ledger.batch(item.batch_id, today)?.value;
            destination_batches.push(self.ledger.check_transfer_in(&source, destination, item.quantity)?);
            sources.push(source);
        }

        let transfer_id = cmd.transfer_id;
        let occurred_at = cmd.occurred_at;
        let out = self.dispatch(
            TRANSFER,
            TransferCommand::ReceiveTransfer(ReceiveTransfer {
                destination_batches,
                ..cmd
            }),
            ExpectedVersion::Exact(current.version()),
            transfer,
        )?;

        let reference = MovementReference::new(ReferenceKind::Transfer, transfer_id);
        for (moved_lines, (item, source)) in current.items().iter().zip(&sources).enumerate() {
            let moved = self
                .ledger
                .transfer_out(item.batch_id, item.quantity, reference, occurred_at)
                .and_then(|_| {
                    self.ledger
                        .transfer_in(source, destination, item.quantity, reference, occurred_at)
                });
            if let Err(e) = moved {
                let err = EngineError::from(DomainError::invariant(format!(
                    "transfer {transfer_id} partly received ({moved_lines} of {} lines): {e}",
                    current.items().len()
                )));
                log_followup_failure("transfer receipt", &err);
                return Err(err);
            }
        }
        info!(%transfer_id, lines = current.items().len(), "transfer received");
        Ok(out.aggregate)
    }

    fn cancel_transfer(&self, cmd: CancelTransfer) -> EngineResult<StockTransfer> {
        let current = self.load_existing(cmd.transfer_id.0, transfer)?;
        let out = self.dispatch(
            TRANSFER,
            TransferCommand::CancelTransfer(cmd),
            ExpectedVersion::Exact(current.version()),
            transfer,
        )?;
        let was_in_transit = out.events.iter().any(|e| {
            matches!(e, TransferEvent::TransferCancelled(c) if c.was_in_transit)
        });
        if was_in_transit {
            let items: Vec<&TransferItem> = out.aggregate.items().iter().collect();
            self.release_transfer_items(&items);
        }
        Ok(out.aggregate)
    }

    fn release_transfer_items(&self, items: &[&TransferItem]) {
        for item in items {
            if let Err(e) = self.ledger.release(item.batch_id, item.quantity) {
                log_followup_failure("transfer reservation release", &EngineError::from(e));
            }
        }
    }

    /// Run an adjustment command. Approval applies the delta to the batch.
    pub fn adjustment_command(&self, command: AdjustmentCommand) -> EngineResult<StockAdjustment> {
        match command {
            AdjustmentCommand::RequestAdjustment(cmd) => {
                let batch = self.ledger.batch(cmd.batch_id, self.clock.today())?.value;
                if batch.drug_id() != cmd.drug_id {
                    return Err(DomainError::validation("batch holds a different drug").into());
                }
                let out = self.dispatch(
                    ADJUSTMENT,
                    AdjustmentCommand::RequestAdjustment(cmd),
                    ExpectedVersion::Any,
                    adjustment,
                )?;
                Ok(out.aggregate)
            }
            AdjustmentCommand::ApproveAdjustment(cmd) => self.approve_adjustment(cmd),
            AdjustmentCommand::MarkAdjustmentApplied(_) => {
                Err(DomainError::invalid_state("adjustments are applied when they are approved").into())
            }
            other => Ok(self.dispatch(ADJUSTMENT, other, ExpectedVersion::Any, adjustment)?.aggregate),
        }
    }

    fn approve_adjustment(&self, cmd: ApproveAdjustment) -> EngineResult<StockAdjustment> {
        let current = self.load_existing(cmd.adjustment_id.0, adjustment)?;
        let adjustment_id = cmd.adjustment_id;
        self.dispatch(
            ADJUSTMENT,
            AdjustmentCommand::ApproveAdjustment(cmd),
            ExpectedVersion::Exact(current.version()),
            adjustment,
        )?;
        self.apply_adjustment(adjustment_id)
    }

    /// Apply an approved adjustment to its batch. The batch is checked before
    /// the adjustment is marked applied; one it cannot absorb stays approved
    /// and can be applied again later.
    pub fn apply_adjustment(&self, adjustment_id: AdjustmentId) -> EngineResult<StockAdjustment> {
        let current = self.load_existing(adjustment_id.0, adjustment)?;
        if current.status() != AdjustmentStatus::Approved {
            return Err(DomainError::invalid_state(format!(
                "adjustment is {:?}, only approved adjustments are applied",
                current.status()
            ))
            .into());
        }

        let reference = MovementReference::new(ReferenceKind::Adjustment, adjustment_id);
        let at = self.clock.now();
        self.ledger
            .batch(current.batch_id(), self.clock.today())?
            .value
            .adjust(current.delta(), reference, at)?;

        let movement_id = Uuid::now_v7();
        let out = self.dispatch(
            ADJUSTMENT,
            AdjustmentCommand::MarkAdjustmentApplied(MarkAdjustmentApplied {
                adjustment_id,
                movement_id,
                occurred_at: at,
            }),
            ExpectedVersion::Exact(current.version()),
            adjustment,
        )?;

        if let Err(e) = self
            .ledger
            .adjust_with_id(movement_id, current.batch_id(), current.delta(), reference, at)
        {
            let err = EngineError::from(e);
            log_followup_failure("stock adjustment", &err);
            return Err(err);
        }
        info!(
            %adjustment_id,
            %movement_id,
            batch_id = %current.batch_id(),
            delta = current.delta(),
            reason = ?current.reason(),
            "stock adjustment applied"
        );
        Ok(out.aggregate)
    }
}
