use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmledger_catalog::DrugId;
use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, typed_id};
use pharmledger_events::{Command, Event};

use crate::batch::{BatchId, LocationId};

typed_id!(
    /// Inter-location transfer identifier.
    TransferId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    InTransit,
    Received,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    pub line_no: u32,
    /// Source batch the quantity is drawn from.
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub quantity: i64,
}

/// Aggregate root: StockTransfer.
///
/// Stock is reserved at the source on dispatch and physically moved on
/// receipt; the engine performs both ledger steps after the events commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTransfer {
    id: TransferId,
    transfer_number: String,
    from_location: LocationId,
    to_location: LocationId,
    status: TransferStatus,
    items: Vec<TransferItem>,
    requested_by: Option<UserId>,
    dispatched_by: Option<UserId>,
    received_by: Option<UserId>,
    destination_batches: Vec<BatchId>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl StockTransfer {
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            transfer_number: String::new(),
            from_location: LocationId::new(AggregateId::default()),
            to_location: LocationId::new(AggregateId::default()),
            status: TransferStatus::Draft,
            items: Vec::new(),
            requested_by: None,
            dispatched_by: None,
            received_by: None,
            destination_batches: Vec::new(),
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn transfer_number(&self) -> &str {
        &self.transfer_number
    }

    pub fn from_location(&self) -> LocationId {
        self.from_location
    }

    pub fn to_location(&self) -> LocationId {
        self.to_location
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }

    pub fn destination_batches(&self) -> &[BatchId] {
        &self.destination_batches
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }
}

impl AggregateRoot for StockTransfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub transfer_number: String,
    pub from_location: LocationId,
    pub to_location: LocationId,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddTransferItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTransferItem {
    pub transfer_id: TransferId,
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispatchTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTransfer {
    pub transfer_id: TransferId,
    pub dispatched_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTransfer {
    pub transfer_id: TransferId,
    pub received_by: UserId,
    /// Destination batch per item, in line order.
    pub destination_batches: Vec<BatchId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub transfer_id: TransferId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    CreateTransfer(CreateTransfer),
    AddTransferItem(AddTransferItem),
    DispatchTransfer(DispatchTransfer),
    ReceiveTransfer(ReceiveTransfer),
    CancelTransfer(CancelTransfer),
}

impl Command for TransferCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            TransferCommand::CreateTransfer(c) => c.transfer_id.0,
            TransferCommand::AddTransferItem(c) => c.transfer_id.0,
            TransferCommand::DispatchTransfer(c) => c.transfer_id.0,
            TransferCommand::ReceiveTransfer(c) => c.transfer_id.0,
            TransferCommand::CancelTransfer(c) => c.transfer_id.0,
        }
    }
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: TransferId,
    pub transfer_number: String,
    pub from_location: LocationId,
    pub to_location: LocationId,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItemAdded {
    pub transfer_id: TransferId,
    pub item: TransferItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferDispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDispatched {
    pub transfer_id: TransferId,
    pub dispatched_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceived {
    pub transfer_id: TransferId,
    pub received_by: UserId,
    pub destination_batches: Vec<BatchId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub transfer_id: TransferId,
    pub reason: String,
    /// Reservations at the source must be released.
    pub was_in_transit: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    TransferCreated(TransferCreated),
    TransferItemAdded(TransferItemAdded),
    TransferDispatched(TransferDispatched),
    TransferReceived(TransferReceived),
    TransferCancelled(TransferCancelled),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferCreated(_) => "inventory.transfer.created",
            TransferEvent::TransferItemAdded(_) => "inventory.transfer.item_added",
            TransferEvent::TransferDispatched(_) => "inventory.transfer.dispatched",
            TransferEvent::TransferReceived(_) => "inventory.transfer.received",
            TransferEvent::TransferCancelled(_) => "inventory.transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::TransferCreated(e) => e.occurred_at,
            TransferEvent::TransferItemAdded(e) => e.occurred_at,
            TransferEvent::TransferDispatched(e) => e.occurred_at,
            TransferEvent::TransferReceived(e) => e.occurred_at,
            TransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockTransfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::TransferCreated(e) => {
                self.id = e.transfer_id;
                self.transfer_number = e.transfer_number.clone();
                self.from_location = e.from_location;
                self.to_location = e.to_location;
                self.requested_by = Some(e.requested_by);
                self.status = TransferStatus::Draft;
                self.created = true;
            }
            TransferEvent::TransferItemAdded(e) => {
                self.items.push(e.item.clone());
            }
            TransferEvent::TransferDispatched(e) => {
                self.status = TransferStatus::InTransit;
                self.dispatched_by = Some(e.dispatched_by);
            }
            TransferEvent::TransferReceived(e) => {
                self.status = TransferStatus::Received;
                self.received_by = Some(e.received_by);
                self.destination_batches = e.destination_batches.clone();
            }
            TransferEvent::TransferCancelled(e) => {
                self.status = TransferStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::CreateTransfer(cmd) => self.handle_create(cmd),
            TransferCommand::AddTransferItem(cmd) => self.handle_add_item(cmd),
            TransferCommand::DispatchTransfer(cmd) => self.handle_dispatch(cmd),
            TransferCommand::ReceiveTransfer(cmd) => self.handle_receive(cmd),
            TransferCommand::CancelTransfer(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl StockTransfer {
    fn ensure_exists(&self, transfer_id: TransferId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: TransferStatus) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "transfer is {:?}, expected {:?}",
                self.status, expected
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer already exists"));
        }
        if cmd.from_location == cmd.to_location {
            return Err(DomainError::validation(
                "source and destination locations must differ",
            ));
        }
        if cmd.transfer_number.trim().is_empty() {
            return Err(DomainError::validation("transfer number cannot be empty"));
        }
        Ok(vec![TransferEvent::TransferCreated(TransferCreated {
            transfer_id: cmd.transfer_id,
            transfer_number: cmd.transfer_number.trim().to_string(),
            from_location: cmd.from_location,
            to_location: cmd.to_location,
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddTransferItem) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;
        self.ensure_status(TransferStatus::Draft)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("transfer quantity must be positive"));
        }
        if self.items.iter().any(|i| i.batch_id == cmd.batch_id) {
            return Err(DomainError::conflict("batch already listed on this transfer"));
        }
        Ok(vec![TransferEvent::TransferItemAdded(TransferItemAdded {
            transfer_id: cmd.transfer_id,
            item: TransferItem {
                line_no: self.items.len() as u32 + 1,
                batch_id: cmd.batch_id,
                drug_id: cmd.drug_id,
                quantity: cmd.quantity,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispatch(&self, cmd: &DispatchTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;
        self.ensure_status(TransferStatus::Draft)?;
        if self.items.is_empty() {
            return Err(DomainError::validation("transfer has no items"));
        }
        Ok(vec![TransferEvent::TransferDispatched(TransferDispatched {
            transfer_id: cmd.transfer_id,
            dispatched_by: cmd.dispatched_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;
        self.ensure_status(TransferStatus::InTransit)?;
        if cmd.destination_batches.len() != self.items.len() {
            return Err(DomainError::invariant(format!(
                "received {} destination batches for {} transfer lines",
                cmd.destination_batches.len(),
                self.items.len()
            )));
        }
        Ok(vec![TransferEvent::TransferReceived(TransferReceived {
            transfer_id: cmd.transfer_id,
            received_by: cmd.received_by,
            destination_batches: cmd.destination_batches.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_exists(cmd.transfer_id)?;
        if !matches!(self.status, TransferStatus::Draft | TransferStatus::InTransit) {
            return Err(DomainError::invalid_state(format!(
                "transfer is {:?} and can no longer be cancelled",
                self.status
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason is required"));
        }
        Ok(vec![TransferEvent::TransferCancelled(TransferCancelled {
            transfer_id: cmd.transfer_id,
            reason: cmd.reason.trim().to_string(),
            was_in_transit: self.status == TransferStatus::InTransit,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmledger_events::execute;

    fn draft_with_item(transfer_id: TransferId) -> StockTransfer {
        let mut transfer = StockTransfer::empty(transfer_id);
        execute(
            &mut transfer,
            &TransferCommand::CreateTransfer(CreateTransfer {
                transfer_id,
                transfer_number: "TR-17".into(),
                from_location: LocationId::generate(),
                to_location: LocationId::generate(),
                requested_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        execute(
            &mut transfer,
            &TransferCommand::AddTransferItem(AddTransferItem {
                transfer_id,
                batch_id: BatchId::generate(),
                drug_id: DrugId::generate(),
                quantity: 12,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        transfer
    }

    fn dispatch(transfer_id: TransferId) -> TransferCommand {
        TransferCommand::DispatchTransfer(DispatchTransfer {
            transfer_id,
            dispatched_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    fn cancel(transfer_id: TransferId) -> TransferCommand {
        TransferCommand::CancelTransfer(CancelTransfer {
            transfer_id,
            reason: "ward closed".into(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn same_location_transfer_is_rejected() {
        let id = TransferId::generate();
        let loc = LocationId::generate();
        let err = StockTransfer::empty(id)
            .handle(&TransferCommand::CreateTransfer(CreateTransfer {
                transfer_id: id,
                transfer_number: "TR-1".into(),
                from_location: loc,
                to_location: loc,
                requested_by: UserId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn dispatch_then_receive() {
        let id = TransferId::generate();
        let mut transfer = draft_with_item(id);
        execute(&mut transfer, &dispatch(id)).unwrap();
        assert_eq!(transfer.status(), TransferStatus::InTransit);

        execute(
            &mut transfer,
            &TransferCommand::ReceiveTransfer(ReceiveTransfer {
                transfer_id: id,
                received_by: UserId::new(),
                destination_batches: vec![BatchId::generate()],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(transfer.status(), TransferStatus::Received);
        assert!(transfer.handle(&cancel(id)).is_err());
    }

    #[test]
    fn cancelling_in_transit_flags_reservation_release() {
        let id = TransferId::generate();
        let mut transfer = draft_with_item(id);
        execute(&mut transfer, &dispatch(id)).unwrap();

        let events = execute(&mut transfer, &cancel(id)).unwrap();
        match &events[0] {
            TransferEvent::TransferCancelled(e) => assert!(e.was_in_transit),
            _ => panic!("expected TransferCancelled"),
        }
        assert_eq!(transfer.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn items_cannot_change_once_dispatched() {
        let id = TransferId::generate();
        let mut transfer = draft_with_item(id);
        execute(&mut transfer, &dispatch(id)).unwrap();
        let err = transfer
            .handle(&TransferCommand::AddTransferItem(AddTransferItem {
                transfer_id: id,
                batch_id: BatchId::generate(),
                drug_id: DrugId::generate(),
                quantity: 1,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }
}
