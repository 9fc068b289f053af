use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmledger_catalog::{DrugId, SupplierId};
use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, UserId, typed_id};
use pharmledger_events::{Command, Event};
use pharmledger_inventory::BatchId;

use crate::dispensing::DispensingId;

typed_id!(
    /// Drug return identifier.
    ReturnId
);

/// Reason code attached to a return, e.g. `wrong_drug`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReturnReason(String);

impl ReturnReason {
    pub const WRONG_DRUG: &'static str = "wrong_drug";
    pub const WRONG_DOSE: &'static str = "wrong_dose";
    pub const WRONG_PATIENT: &'static str = "wrong_patient";
    pub const QUALITY_DEFECT: &'static str = "quality_defect";
    pub const RECALLED: &'static str = "recalled";
    pub const DAMAGED: &'static str = "damaged";
    pub const EXPIRED: &'static str = "expired";
    pub const ADVERSE_REACTION: &'static str = "adverse_reaction";
    pub const THERAPY_CHANGED: &'static str = "therapy_changed";
    pub const PATIENT_REFUSED: &'static str = "patient_refused";
    pub const PATIENT_DISCHARGED: &'static str = "patient_discharged";
    pub const PATIENT_DECEASED: &'static str = "patient_deceased";
    pub const EXCESS_QUANTITY: &'static str = "excess_quantity";

    pub fn new(code: impl Into<String>) -> DomainResult<Self> {
        let code = code.into().trim().to_ascii_lowercase();
        if code.is_empty() {
            return Err(DomainError::validation("return reason cannot be empty"));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ReturnReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a reason implies for the return workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnBehavior {
    pub is_pharmacy_error: bool,
    pub incident_report_required: bool,
    pub quality_issue: bool,
    pub can_restock: bool,
}

/// Reason code → behavior lookup. Unknown codes are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnPolicyTable {
    entries: BTreeMap<String, ReturnBehavior>,
}

impl ReturnPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let error = ReturnBehavior {
            is_pharmacy_error: true,
            incident_report_required: true,
            ..ReturnBehavior::default()
        };
        let quality = ReturnBehavior {
            quality_issue: true,
            ..ReturnBehavior::default()
        };
        let restockable = ReturnBehavior {
            can_restock: true,
            ..ReturnBehavior::default()
        };

        Self::new()
            .with(ReturnReason::WRONG_DRUG, ReturnBehavior { can_restock: true, ..error })
            .with(ReturnReason::WRONG_DOSE, ReturnBehavior { can_restock: true, ..error })
            .with(ReturnReason::WRONG_PATIENT, error)
            .with(ReturnReason::QUALITY_DEFECT, quality)
            .with(ReturnReason::RECALLED, quality)
            .with(ReturnReason::DAMAGED, ReturnBehavior::default())
            .with(ReturnReason::EXPIRED, error)
            .with(
                ReturnReason::ADVERSE_REACTION,
                ReturnBehavior {
                    incident_report_required: true,
                    ..ReturnBehavior::default()
                },
            )
            .with(ReturnReason::THERAPY_CHANGED, restockable)
            .with(ReturnReason::PATIENT_REFUSED, restockable)
            .with(ReturnReason::PATIENT_DISCHARGED, restockable)
            .with(ReturnReason::PATIENT_DECEASED, restockable)
            .with(ReturnReason::EXCESS_QUANTITY, restockable)
    }

    pub fn with(mut self, code: &str, behavior: ReturnBehavior) -> Self {
        self.entries.insert(code.to_ascii_lowercase(), behavior);
        self
    }

    pub fn behavior(&self, reason: &ReturnReason) -> DomainResult<ReturnBehavior> {
        self.entries
            .get(reason.as_str())
            .copied()
            .ok_or_else(|| DomainError::validation(format!("unknown return reason '{reason}'")))
    }

    pub fn contains(&self, reason: &ReturnReason) -> bool {
        self.entries.contains_key(reason.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMethod {
    Cash,
    Card,
    Account,
    Insurance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub amount: i64,
    pub method: RefundMethod,
    pub processed_by: UserId,
    pub processed_at: DateTime<Utc>,
}

/// Aggregate root: DrugReturn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrugReturn {
    id: ReturnId,
    return_number: String,
    dispensing_id: DispensingId,
    line_no: u32,
    drug_id: DrugId,
    batch_id: BatchId,
    quantity: i64,
    unit_price: i64,
    reason: ReturnReason,
    status: ReturnStatus,
    behavior: Option<ReturnBehavior>,
    requested_by: Option<UserId>,
    reviewed_by: Option<UserId>,
    rejection_reason: Option<String>,
    restock_movement: Option<uuid::Uuid>,
    refund: Option<Refund>,
    supplier_notified: bool,
    incident_report_number: Option<String>,
    version: u64,
    created: bool,
}

impl DrugReturn {
    pub fn empty(id: ReturnId) -> Self {
        Self {
            id,
            return_number: String::new(),
            dispensing_id: DispensingId::new(AggregateId::default()),
            line_no: 0,
            drug_id: DrugId::new(AggregateId::default()),
            batch_id: BatchId::new(AggregateId::default()),
            quantity: 0,
            unit_price: 0,
            reason: ReturnReason(String::new()),
            status: ReturnStatus::Requested,
            behavior: None,
            requested_by: None,
            reviewed_by: None,
            rejection_reason: None,
            restock_movement: None,
            refund: None,
            supplier_notified: false,
            incident_report_number: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReturnId {
        self.id
    }

    pub fn return_number(&self) -> &str {
        &self.return_number
    }

    pub fn dispensing_id(&self) -> DispensingId {
        self.dispensing_id
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn drug_id(&self) -> DrugId {
        self.drug_id
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reason(&self) -> &ReturnReason {
        &self.reason
    }

    pub fn status(&self) -> ReturnStatus {
        self.status
    }

    /// Set once the return is approved.
    pub fn behavior(&self) -> Option<ReturnBehavior> {
        self.behavior
    }

    pub fn is_restocked(&self) -> bool {
        self.restock_movement.is_some()
    }

    pub fn refund(&self) -> Option<&Refund> {
        self.refund.as_ref()
    }

    pub fn supplier_notified(&self) -> bool {
        self.supplier_notified
    }

    pub fn incident_report_number(&self) -> Option<&str> {
        self.incident_report_number.as_deref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    /// Value of the returned units at the dispensed price.
    pub fn return_value(&self) -> i64 {
        self.quantity * self.unit_price
    }

    /// Mandatory follow-ups still open before the return may be closed.
    pub fn pending_steps(&self) -> Vec<&'static str> {
        let mut steps = Vec::new();
        if let Some(b) = self.behavior {
            if b.quality_issue && !self.supplier_notified {
                steps.push("supplier notification");
            }
            if b.incident_report_required && self.incident_report_number.is_none() {
                steps.push("incident report");
            }
        }
        steps
    }
}

impl AggregateRoot for DrugReturn {
    type Id = ReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReturn {
    pub return_id: ReturnId,
    pub return_number: String,
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub drug_id: DrugId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_price: i64,
    pub reason: ReturnReason,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveReturn. `behavior` comes from the policy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveReturn {
    pub return_id: ReturnId,
    pub reviewed_by: UserId,
    pub behavior: ReturnBehavior,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectReturn {
    pub return_id: ReturnId,
    pub reviewed_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordRestock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRestock {
    pub return_id: ReturnId,
    pub handled_by: UserId,
    pub movement_id: uuid::Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProcessRefund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRefund {
    pub return_id: ReturnId,
    pub amount: i64,
    pub method: RefundMethod,
    pub processed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: NotifySupplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifySupplier {
    pub return_id: ReturnId,
    pub supplier_id: Option<SupplierId>,
    pub notified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CreateIncidentReport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIncidentReport {
    pub return_id: ReturnId,
    pub report_number: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReturn {
    pub return_id: ReturnId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCommand {
    RequestReturn(RequestReturn),
    ApproveReturn(ApproveReturn),
    RejectReturn(RejectReturn),
    RecordRestock(RecordRestock),
    ProcessRefund(ProcessRefund),
    NotifySupplier(NotifySupplier),
    CreateIncidentReport(CreateIncidentReport),
    CloseReturn(CloseReturn),
}

impl Command for ReturnCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            ReturnCommand::RequestReturn(c) => c.return_id.0,
            ReturnCommand::ApproveReturn(c) => c.return_id.0,
            ReturnCommand::RejectReturn(c) => c.return_id.0,
            ReturnCommand::RecordRestock(c) => c.return_id.0,
            ReturnCommand::ProcessRefund(c) => c.return_id.0,
            ReturnCommand::NotifySupplier(c) => c.return_id.0,
            ReturnCommand::CreateIncidentReport(c) => c.return_id.0,
            ReturnCommand::CloseReturn(c) => c.return_id.0,
        }
    }
}

/// Event: ReturnRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequested {
    pub return_id: ReturnId,
    pub return_number: String,
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub drug_id: DrugId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_price: i64,
    pub reason: ReturnReason,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnApproved {
    pub return_id: ReturnId,
    pub reviewed_by: UserId,
    pub behavior: ReturnBehavior,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRejected {
    pub return_id: ReturnId,
    pub reviewed_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnRestocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRestocked {
    pub return_id: ReturnId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub movement_id: uuid::Uuid,
    pub handled_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundProcessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundProcessed {
    pub return_id: ReturnId,
    pub refund: Refund,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SupplierNotified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierNotified {
    pub return_id: ReturnId,
    pub supplier_id: Option<SupplierId>,
    pub notified_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: IncidentReportCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentReportCreated {
    pub return_id: ReturnId,
    pub report_number: String,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnClosed {
    pub return_id: ReturnId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnEvent {
    ReturnRequested(ReturnRequested),
    ReturnApproved(ReturnApproved),
    ReturnRejected(ReturnRejected),
    ReturnRestocked(ReturnRestocked),
    RefundProcessed(RefundProcessed),
    SupplierNotified(SupplierNotified),
    IncidentReportCreated(IncidentReportCreated),
    ReturnClosed(ReturnClosed),
}

impl Event for ReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReturnEvent::ReturnRequested(_) => "dispensing.return.requested",
            ReturnEvent::ReturnApproved(_) => "dispensing.return.approved",
            ReturnEvent::ReturnRejected(_) => "dispensing.return.rejected",
            ReturnEvent::ReturnRestocked(_) => "dispensing.return.restocked",
            ReturnEvent::RefundProcessed(_) => "dispensing.return.refund_processed",
            ReturnEvent::SupplierNotified(_) => "dispensing.return.supplier_notified",
            ReturnEvent::IncidentReportCreated(_) => "dispensing.return.incident_report_created",
            ReturnEvent::ReturnClosed(_) => "dispensing.return.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReturnEvent::ReturnRequested(e) => e.occurred_at,
            ReturnEvent::ReturnApproved(e) => e.occurred_at,
            ReturnEvent::ReturnRejected(e) => e.occurred_at,
            ReturnEvent::ReturnRestocked(e) => e.occurred_at,
            ReturnEvent::RefundProcessed(e) => e.occurred_at,
            ReturnEvent::SupplierNotified(e) => e.occurred_at,
            ReturnEvent::IncidentReportCreated(e) => e.occurred_at,
            ReturnEvent::ReturnClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DrugReturn {
    type Command = ReturnCommand;
    type Event = ReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReturnEvent::ReturnRequested(e) => {
                self.id = e.return_id;
                self.return_number = e.return_number.clone();
                self.dispensing_id = e.dispensing_id;
                self.line_no = e.line_no;
                self.drug_id = e.drug_id;
                self.batch_id = e.batch_id;
                self.quantity = e.quantity;
                self.unit_price = e.unit_price;
                self.reason = e.reason.clone();
                self.requested_by = Some(e.requested_by);
                self.status = ReturnStatus::Requested;
                self.created = true;
            }
            ReturnEvent::ReturnApproved(e) => {
                self.behavior = Some(e.behavior);
                self.reviewed_by = Some(e.reviewed_by);
                self.status = ReturnStatus::Approved;
            }
            ReturnEvent::ReturnRejected(e) => {
                self.reviewed_by = Some(e.reviewed_by);
                self.rejection_reason = Some(e.reason.clone());
                self.status = ReturnStatus::Rejected;
            }
            ReturnEvent::ReturnRestocked(e) => {
                self.restock_movement = Some(e.movement_id);
            }
            ReturnEvent::RefundProcessed(e) => {
                self.refund = Some(e.refund);
            }
            ReturnEvent::SupplierNotified(_) => {
                self.supplier_notified = true;
            }
            ReturnEvent::IncidentReportCreated(e) => {
                self.incident_report_number = Some(e.report_number.clone());
            }
            ReturnEvent::ReturnClosed(_) => {
                self.status = ReturnStatus::Closed;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReturnCommand::RequestReturn(cmd) => self.handle_request(cmd),
            ReturnCommand::ApproveReturn(cmd) => self.handle_approve(cmd),
            ReturnCommand::RejectReturn(cmd) => self.handle_reject(cmd),
            ReturnCommand::RecordRestock(cmd) => self.handle_restock(cmd),
            ReturnCommand::ProcessRefund(cmd) => self.handle_refund(cmd),
            ReturnCommand::NotifySupplier(cmd) => self.handle_notify_supplier(cmd),
            ReturnCommand::CreateIncidentReport(cmd) => self.handle_incident_report(cmd),
            ReturnCommand::CloseReturn(cmd) => self.handle_close(cmd),
        }
    }
}

impl DrugReturn {
    fn ensure_exists(&self, return_id: ReturnId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != return_id {
            return Err(DomainError::invariant("return_id mismatch"));
        }
        Ok(())
    }

    /// Follow-up steps need an approved, still-open return.
    fn ensure_approved(&self) -> Result<ReturnBehavior, DomainError> {
        match (self.status, self.behavior) {
            (ReturnStatus::Approved, Some(behavior)) => Ok(behavior),
            (ReturnStatus::Requested, _) => Err(DomainError::approval_required(format!(
                "return {} is not approved",
                self.return_number
            ))),
            (status, _) => Err(DomainError::invalid_state(format!("return is {status:?}"))),
        }
    }

    fn handle_request(&self, cmd: &RequestReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("return already exists"));
        }
        if cmd.return_number.trim().is_empty() {
            return Err(DomainError::validation("return number cannot be empty"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("return quantity must be positive"));
        }
        if cmd.unit_price < 0 {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        Ok(vec![ReturnEvent::ReturnRequested(ReturnRequested {
            return_id: cmd.return_id,
            return_number: cmd.return_number.trim().to_string(),
            dispensing_id: cmd.dispensing_id,
            line_no: cmd.line_no,
            drug_id: cmd.drug_id,
            batch_id: cmd.batch_id,
            quantity: cmd.quantity,
            unit_price: cmd.unit_price,
            reason: cmd.reason.clone(),
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        self.ensure_exists(cmd.return_id)?;
        if self.status != ReturnStatus::Requested {
            return Err(DomainError::invalid_state("only requested returns can be approved"));
        }
        Ok(vec![ReturnEvent::ReturnApproved(ReturnApproved {
            return_id: cmd.return_id,
            reviewed_by: cmd.reviewed_by,
            behavior: cmd.behavior,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        self.ensure_exists(cmd.return_id)?;
        if self.status != ReturnStatus::Requested {
            return Err(DomainError::invalid_state("only requested returns can be rejected"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }
        Ok(vec![ReturnEvent::ReturnRejected(ReturnRejected {
            return_id: cmd.return_id,
            reviewed_by: cmd.reviewed_by,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restock(&self, cmd: &RecordRestock) -> Result<Vec<ReturnEvent>, DomainError> {
        self.ensure_exists(cmd.return_id)?;
        let behavior = self.ensure_approved()?;
        if !behavior.can_restock {
            return Err(DomainError::invalid_state(format!(
                "returns for '{}' cannot be restocked",
                self.reason
            )));
        }
        if self.is_restocked() {
            return Err(DomainError::invalid_state("return already restocked"));
        }
        Ok(vec![ReturnEvent::ReturnRestocked(ReturnRestocked {
            return_id: cmd.return_id,
            batch_id: self.batch_id,
            quantity: self.quantity,
            movement_id: cmd.movement_id,
            handled_by: cmd.handled_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &ProcessRefund) -> Result<Vec<ReturnEvent>, DomainError> {
        self.ensure_exists(cmd.return_id)?;
        self.ensure_approved()?;
        if self.refund.is_some() {
            return Err(DomainError::invalid_state("refund already processed"));
        }
        if cmd.amount <= 0 || cmd.amount > self.return_value() {
            return Err(DomainError::validation(format!(
                "refund of {} must be positive and at most {}",
                cmd.amount,
                self.return_value()
            )));
        }
        Ok(vec![ReturnEvent::RefundProcessed(RefundProcessed {
            return_id: cmd.return_id,
            refund: Refund {
                amount: cmd.amount,
                method: cmd.method,
                processed_by: cmd.processed_by,
                processed_at: cmd.occurred_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_notify_supplier(&self, cmd: &NotifySupplier) -> Result<Vec<ReturnEvent>, DomainError> {
        self.ensure_exists(cmd.return_id)?;
        let behavior = self.ensure_approved()?;
        if !behavior.quality_issue {
            return Err(DomainError::invalid_state("supplier notice is only for quality issues"));
        }
        if self.supplier_notified {
            return Err(DomainError::invalid_state("supplier already notified"));
        }
        Ok(vec![ReturnEvent::SupplierNotified(SupplierNotified {
            return_id: cmd.return_id,
            supplier_id: cmd.supplier_id,
            notified_by: cmd.notified_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_incident_report(&self, cmd: &CreateIncidentReport) -> Result<Vec<ReturnEvent>, DomainError> {
        self.ensure_exists(cmd.return_id)?;
        let behavior = self.ensure_approved()?;
        if !behavior.incident_report_required {
            return Err(DomainError::invalid_state("no incident report required for this reason"));
        }
        if self.incident_report_number.is_some() {
            return Err(DomainError::invalid_state("incident report already created"));
        }
        if cmd.report_number.trim().is_empty() {
            return Err(DomainError::validation("report number cannot be empty"));
        }
        Ok(vec![ReturnEvent::IncidentReportCreated(IncidentReportCreated {
            return_id: cmd.return_id,
            report_number: cmd.report_number.trim().to_string(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseReturn) -> Result<Vec<ReturnEvent>, DomainError> {
        self.ensure_exists(cmd.return_id)?;
        self.ensure_approved()?;
        let pending = self.pending_steps();
        if !pending.is_empty() {
            return Err(DomainError::invalid_state(format!(
                "return still needs: {}",
                pending.join(", ")
            )));
        }
        Ok(vec![ReturnEvent::ReturnClosed(ReturnClosed {
            return_id: cmd.return_id,
            closed_by: cmd.closed_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}
