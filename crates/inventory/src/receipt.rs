use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pharmledger_catalog::{DrugId, SupplierId};
use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, typed_id};
use pharmledger_events::{Command, Event};

use crate::batch::{BatchId, IncomingStock, LocationId};

typed_id!(
    /// Goods receipt identifier.
    ReceiptId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Draft,
    Submitted,
    Approved,
    Posted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub line_no: u32,
    pub drug_id: DrugId,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub unit_cost: i64,
}

impl ReceiptItem {
    pub fn line_total(&self) -> i64 {
        self.quantity * self.unit_cost
    }

    pub fn incoming(&self, location_id: LocationId, supplier_id: Option<SupplierId>) -> IncomingStock {
        IncomingStock {
            drug_id: self.drug_id,
            location_id,
            batch_number: self.batch_number.clone(),
            expiry_date: self.expiry_date,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            supplier_id,
        }
    }
}

/// Aggregate root: StockReceipt (goods received from a supplier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockReceipt {
    id: ReceiptId,
    receipt_number: String,
    supplier_id: Option<SupplierId>,
    location_id: LocationId,
    received_on: NaiveDate,
    status: ReceiptStatus,
    items: Vec<ReceiptItem>,
    created_by: Option<UserId>,
    approved_by: Option<UserId>,
    rejection_reason: Option<String>,
    posted_batches: Vec<BatchId>,
    next_line_no: u32,
    version: u64,
    created: bool,
}

impl StockReceipt {
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            receipt_number: String::new(),
            supplier_id: None,
            location_id: LocationId::new(AggregateId::default()),
            received_on: NaiveDate::MIN,
            status: ReceiptStatus::Draft,
            items: Vec::new(),
            created_by: None,
            approved_by: None,
            rejection_reason: None,
            posted_batches: Vec::new(),
            next_line_no: 1,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptId {
        self.id
    }

    pub fn receipt_number(&self) -> &str {
        &self.receipt_number
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    pub fn items(&self) -> &[ReceiptItem] {
        &self.items
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn posted_batches(&self) -> &[BatchId] {
        &self.posted_batches
    }

    pub fn total_value(&self) -> i64 {
        self.items.iter().map(ReceiptItem::line_total).sum()
    }

    /// Incoming stock for every line, ready to post through the ledger.
    pub fn incoming_stock(&self) -> Vec<IncomingStock> {
        self.items
            .iter()
            .map(|i| i.incoming(self.location_id, self.supplier_id))
            .collect()
    }
}

impl AggregateRoot for StockReceipt {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReceipt {
    pub receipt_id: ReceiptId,
    pub receipt_number: String,
    pub supplier_id: Option<SupplierId>,
    pub location_id: LocationId,
    pub received_on: NaiveDate,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddReceiptItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReceiptItem {
    pub receipt_id: ReceiptId,
    pub drug_id: DrugId,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub unit_cost: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveReceiptItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveReceiptItem {
    pub receipt_id: ReceiptId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub receipt_id: ReceiptId,
    pub submitted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveReceipt {
    pub receipt_id: ReceiptId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectReceipt {
    pub receipt_id: ReceiptId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkReceiptPosted (stock is on the shelves).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReceiptPosted {
    pub receipt_id: ReceiptId,
    /// One batch per receipt line, in line order.
    pub batch_ids: Vec<BatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    CreateReceipt(CreateReceipt),
    AddReceiptItem(AddReceiptItem),
    RemoveReceiptItem(RemoveReceiptItem),
    SubmitReceipt(SubmitReceipt),
    ApproveReceipt(ApproveReceipt),
    RejectReceipt(RejectReceipt),
    MarkReceiptPosted(MarkReceiptPosted),
}

impl Command for ReceiptCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            ReceiptCommand::CreateReceipt(c) => c.receipt_id.0,
            ReceiptCommand::AddReceiptItem(c) => c.receipt_id.0,
            ReceiptCommand::RemoveReceiptItem(c) => c.receipt_id.0,
            ReceiptCommand::SubmitReceipt(c) => c.receipt_id.0,
            ReceiptCommand::ApproveReceipt(c) => c.receipt_id.0,
            ReceiptCommand::RejectReceipt(c) => c.receipt_id.0,
            ReceiptCommand::MarkReceiptPosted(c) => c.receipt_id.0,
        }
    }
}

/// Event: ReceiptCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCreated {
    pub receipt_id: ReceiptId,
    pub receipt_number: String,
    pub supplier_id: Option<SupplierId>,
    pub location_id: LocationId,
    pub received_on: NaiveDate,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItemAdded {
    pub receipt_id: ReceiptId,
    pub item: ReceiptItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptItemRemoved {
    pub receipt_id: ReceiptId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptSubmitted {
    pub receipt_id: ReceiptId,
    pub submitted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptApproved {
    pub receipt_id: ReceiptId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRejected {
    pub receipt_id: ReceiptId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptPosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptPosted {
    pub receipt_id: ReceiptId,
    pub batch_ids: Vec<BatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptEvent {
    ReceiptCreated(ReceiptCreated),
    ReceiptItemAdded(ReceiptItemAdded),
    ReceiptItemRemoved(ReceiptItemRemoved),
    ReceiptSubmitted(ReceiptSubmitted),
    ReceiptApproved(ReceiptApproved),
    ReceiptRejected(ReceiptRejected),
    ReceiptPosted(ReceiptPosted),
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptCreated(_) => "inventory.receipt.created",
            ReceiptEvent::ReceiptItemAdded(_) => "inventory.receipt.item_added",
            ReceiptEvent::ReceiptItemRemoved(_) => "inventory.receipt.item_removed",
            ReceiptEvent::ReceiptSubmitted(_) => "inventory.receipt.submitted",
            ReceiptEvent::ReceiptApproved(_) => "inventory.receipt.approved",
            ReceiptEvent::ReceiptRejected(_) => "inventory.receipt.rejected",
            ReceiptEvent::ReceiptPosted(_) => "inventory.receipt.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::ReceiptCreated(e) => e.occurred_at,
            ReceiptEvent::ReceiptItemAdded(e) => e.occurred_at,
            ReceiptEvent::ReceiptItemRemoved(e) => e.occurred_at,
            ReceiptEvent::ReceiptSubmitted(e) => e.occurred_at,
            ReceiptEvent::ReceiptApproved(e) => e.occurred_at,
            ReceiptEvent::ReceiptRejected(e) => e.occurred_at,
            ReceiptEvent::ReceiptPosted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockReceipt {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::ReceiptCreated(e) => {
                self.id = e.receipt_id;
                self.receipt_number = e.receipt_number.clone();
                self.supplier_id = e.supplier_id;
                self.location_id = e.location_id;
                self.received_on = e.received_on;
                self.created_by = Some(e.created_by);
                self.status = ReceiptStatus::Draft;
                self.created = true;
            }
            ReceiptEvent::ReceiptItemAdded(e) => {
                self.next_line_no = self.next_line_no.max(e.item.line_no + 1);
                self.items.push(e.item.clone());
            }
            ReceiptEvent::ReceiptItemRemoved(e) => {
                self.items.retain(|i| i.line_no != e.line_no);
            }
            ReceiptEvent::ReceiptSubmitted(_) => {
                self.status = ReceiptStatus::Submitted;
            }
            ReceiptEvent::ReceiptApproved(e) => {
                self.status = ReceiptStatus::Approved;
                self.approved_by = Some(e.approved_by);
            }
            ReceiptEvent::ReceiptRejected(e) => {
                self.status = ReceiptStatus::Rejected;
                self.rejection_reason = Some(e.reason.clone());
            }
            ReceiptEvent::ReceiptPosted(e) => {
                self.status = ReceiptStatus::Posted;
                self.posted_batches = e.batch_ids.clone();
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::CreateReceipt(cmd) => self.handle_create(cmd),
            ReceiptCommand::AddReceiptItem(cmd) => self.handle_add_item(cmd),
            ReceiptCommand::RemoveReceiptItem(cmd) => self.handle_remove_item(cmd),
            ReceiptCommand::SubmitReceipt(cmd) => self.handle_submit(cmd),
            ReceiptCommand::ApproveReceipt(cmd) => self.handle_approve(cmd),
            ReceiptCommand::RejectReceipt(cmd) => self.handle_reject(cmd),
            ReceiptCommand::MarkReceiptPosted(cmd) => self.handle_posted(cmd),
        }
    }
}

impl StockReceipt {
    fn ensure_status(&self, receipt_id: ReceiptId, expected: ReceiptStatus) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != receipt_id {
            return Err(DomainError::invariant("receipt_id mismatch"));
        }
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "receipt is {:?}, expected {:?}",
                self.status, expected
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("receipt already exists"));
        }
        if cmd.receipt_number.trim().is_empty() {
            return Err(DomainError::validation("receipt number cannot be empty"));
        }
        Ok(vec![ReceiptEvent::ReceiptCreated(ReceiptCreated {
            receipt_id: cmd.receipt_id,
            receipt_number: cmd.receipt_number.trim().to_string(),
            supplier_id: cmd.supplier_id,
            location_id: cmd.location_id,
            received_on: cmd.received_on,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddReceiptItem) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_status(cmd.receipt_id, ReceiptStatus::Draft)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        if cmd.unit_cost < 0 {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        if cmd.batch_number.trim().is_empty() {
            return Err(DomainError::validation("batch number cannot be empty"));
        }
        if cmd.expiry_date <= self.received_on {
            return Err(DomainError::validation("expiry date must be after the receipt date"));
        }
        let duplicate = self
            .items
            .iter()
            .any(|i| i.drug_id == cmd.drug_id && i.batch_number == cmd.batch_number.trim());
        if duplicate {
            return Err(DomainError::conflict("batch already listed on this receipt"));
        }

        Ok(vec![ReceiptEvent::ReceiptItemAdded(ReceiptItemAdded {
            receipt_id: cmd.receipt_id,
            item: ReceiptItem {
                line_no: self.next_line_no,
                drug_id: cmd.drug_id,
                batch_number: cmd.batch_number.trim().to_string(),
                expiry_date: cmd.expiry_date,
                quantity: cmd.quantity,
                unit_cost: cmd.unit_cost,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveReceiptItem) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_status(cmd.receipt_id, ReceiptStatus::Draft)?;
        if !self.items.iter().any(|i| i.line_no == cmd.line_no) {
            return Err(DomainError::not_found());
        }
        Ok(vec![ReceiptEvent::ReceiptItemRemoved(ReceiptItemRemoved {
            receipt_id: cmd.receipt_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_status(cmd.receipt_id, ReceiptStatus::Draft)?;
        if self.items.is_empty() {
            return Err(DomainError::validation("receipt has no items"));
        }
        Ok(vec![ReceiptEvent::ReceiptSubmitted(ReceiptSubmitted {
            receipt_id: cmd.receipt_id,
            submitted_by: cmd.submitted_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_status(cmd.receipt_id, ReceiptStatus::Submitted)?;
        Ok(vec![ReceiptEvent::ReceiptApproved(ReceiptApproved {
            receipt_id: cmd.receipt_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_status(cmd.receipt_id, ReceiptStatus::Submitted)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }
        Ok(vec![ReceiptEvent::ReceiptRejected(ReceiptRejected {
            receipt_id: cmd.receipt_id,
            rejected_by: cmd.rejected_by,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_posted(&self, cmd: &MarkReceiptPosted) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_status(cmd.receipt_id, ReceiptStatus::Approved)?;
        if cmd.batch_ids.len() != self.items.len() {
            return Err(DomainError::invariant(format!(
                "posting recorded {} batches for {} receipt lines",
                cmd.batch_ids.len(),
                self.items.len()
            )));
        }
        Ok(vec![ReceiptEvent::ReceiptPosted(ReceiptPosted {
            receipt_id: cmd.receipt_id,
            batch_ids: cmd.batch_ids.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pharmledger_events::execute;

    fn draft(receipt_id: ReceiptId) -> StockReceipt {
        let mut receipt = StockReceipt::empty(receipt_id);
        execute(
            &mut receipt,
            &ReceiptCommand::CreateReceipt(CreateReceipt {
                receipt_id,
                receipt_number: "GR-0001".into(),
                supplier_id: Some(SupplierId::generate()),
                location_id: LocationId::generate(),
                received_on: Utc::now().date_naive(),
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        receipt
    }

    fn add_item(receipt_id: ReceiptId, batch: &str, expires_in: i64, quantity: i64) -> ReceiptCommand {
        ReceiptCommand::AddReceiptItem(AddReceiptItem {
            receipt_id,
            drug_id: DrugId::generate(),
            batch_number: batch.into(),
            expiry_date: Utc::now().date_naive() + Duration::days(expires_in),
            quantity,
            unit_cost: 250,
            occurred_at: Utc::now(),
        })
    }

    fn submit(receipt_id: ReceiptId) -> ReceiptCommand {
        ReceiptCommand::SubmitReceipt(SubmitReceipt {
            receipt_id,
            submitted_by: UserId::new(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn full_lifecycle_reaches_posted() {
        let id = ReceiptId::generate();
        let mut receipt = draft(id);
        execute(&mut receipt, &add_item(id, "L1", 365, 100)).unwrap();
        execute(&mut receipt, &add_item(id, "L2", 200, 40)).unwrap();
        assert_eq!(receipt.total_value(), 35_000);

        execute(&mut receipt, &submit(id)).unwrap();
        execute(
            &mut receipt,
            &ReceiptCommand::ApproveReceipt(ApproveReceipt {
                receipt_id: id,
                approved_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let events = execute(
            &mut receipt,
            &ReceiptCommand::MarkReceiptPosted(MarkReceiptPosted {
                receipt_id: id,
                batch_ids: vec![BatchId::generate(), BatchId::generate()],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        match &events[0] {
            ReceiptEvent::ReceiptPosted(e) => assert_eq!(e.batch_ids.len(), 2),
            _ => panic!("expected ReceiptPosted"),
        }
        assert_eq!(receipt.status(), ReceiptStatus::Posted);
        assert_eq!(receipt.version(), 6);
        assert_eq!(receipt.incoming_stock().len(), 2);
    }

    #[test]
    fn empty_receipt_cannot_be_submitted() {
        let id = ReceiptId::generate();
        let receipt = draft(id);
        let err = receipt.handle(&submit(id)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn expiry_must_follow_receipt_date() {
        let id = ReceiptId::generate();
        let receipt = draft(id);
        assert!(receipt.handle(&add_item(id, "OLD", 0, 10)).is_err());
        assert!(receipt.handle(&add_item(id, "NEG", 30, 0)).is_err());
    }

    #[test]
    fn items_are_frozen_after_submission() {
        let id = ReceiptId::generate();
        let mut receipt = draft(id);
        execute(&mut receipt, &add_item(id, "L1", 90, 10)).unwrap();
        execute(&mut receipt, &submit(id)).unwrap();

        let err = receipt.handle(&add_item(id, "L2", 90, 10)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn only_submitted_receipts_can_be_rejected() {
        let id = ReceiptId::generate();
        let mut receipt = draft(id);
        let reject = ReceiptCommand::RejectReceipt(RejectReceipt {
            receipt_id: id,
            rejected_by: UserId::new(),
            reason: "wrong supplier".into(),
            occurred_at: Utc::now(),
        });
        assert!(receipt.handle(&reject).is_err());

        execute(&mut receipt, &add_item(id, "L1", 90, 10)).unwrap();
        execute(&mut receipt, &submit(id)).unwrap();
        execute(&mut receipt, &reject).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Rejected);
    }
}
