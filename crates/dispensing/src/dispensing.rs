use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmledger_catalog::DrugId;
use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, typed_id};
use pharmledger_events::{Command, Event};
use pharmledger_inventory::{AllocationLine, LocationId};
use pharmledger_prescribing::{LineQuantity, PatientId, PrescriptionId};

typed_id!(
    /// Dispensing transaction identifier.
    DispensingId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispensingStatus {
    Queue,
    Preparing,
    Verification,
    Ready,
    Dispensed,
    OnHold,
    Cancelled,
}

impl DispensingStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, DispensingStatus::Dispensed | DispensingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingItem {
    /// Prescription line this item fulfils.
    pub line_no: u32,
    pub drug_id: DrugId,
    pub prescribed_quantity: i64,
    /// Quantity being handed over; set from the allocation.
    pub dispensed_quantity: i64,
    pub returned_quantity: i64,
    /// Selling price per unit, smallest currency unit.
    pub unit_price: i64,
    pub allocations: Vec<AllocationLine>,
    pub requires_dual_check: bool,
    pub substituted_from: Option<DrugId>,
    pub substitution_reason: Option<String>,
}

impl DispensingItem {
    pub fn line_total(&self) -> i64 {
        self.dispensed_quantity * self.unit_price
    }

    pub fn allocated_quantity(&self) -> i64 {
        self.allocations.iter().map(|a| a.quantity).sum()
    }

    pub fn returnable_quantity(&self) -> i64 {
        (self.dispensed_quantity - self.returned_quantity).max(0)
    }

    pub fn is_short(&self) -> bool {
        self.dispensed_quantity < self.prescribed_quantity
    }
}

/// Figures read by billing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingTotals {
    pub total_items: i64,
    pub total_quantity: i64,
    pub subtotal: i64,
    pub service_fee: i64,
    pub total_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientCounseling {
    pub pharmacist: UserId,
    pub topics: Vec<String>,
    pub notes: Option<String>,
    pub understanding_confirmed: bool,
    pub completed_at: DateTime<Utc>,
}

/// Requested line for a new dispensing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDispensingItem {
    pub line_no: u32,
    pub drug_id: DrugId,
    pub quantity: i64,
    pub unit_price: i64,
    pub requires_dual_check: bool,
}

/// Reserved stock for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAllocation {
    pub line_no: u32,
    pub lines: Vec<AllocationLine>,
}

impl ItemAllocation {
    pub fn quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

/// Aggregate root: Dispensing.
///
/// Stock effects (allocation, consumption, release) are carried out by the
/// engine around the commands; the aggregate records what was reserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispensing {
    id: DispensingId,
    dispensing_number: String,
    prescription_id: PrescriptionId,
    patient_id: PatientId,
    location_id: LocationId,
    status: DispensingStatus,
    held_from: Option<DispensingStatus>,
    items: Vec<DispensingItem>,
    counseling_required: bool,
    counseling: Option<PatientCounseling>,
    allow_partial: bool,
    service_fee: i64,
    totals: DispensingTotals,
    prepared_by: Option<UserId>,
    verified_by: Option<UserId>,
    verification_notes: Option<String>,
    actual_ready_time: Option<DateTime<Utc>>,
    dispensed_by: Option<UserId>,
    recipient: Option<String>,
    dispensed_at: Option<DateTime<Utc>>,
    hold_reason: Option<String>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Dispensing {
    pub fn empty(id: DispensingId) -> Self {
        Self {
            id,
            dispensing_number: String::new(),
            prescription_id: PrescriptionId::new(AggregateId::default()),
            patient_id: PatientId::new(AggregateId::default()),
            location_id: LocationId::new(AggregateId::default()),
            status: DispensingStatus::Queue,
            held_from: None,
            items: Vec::new(),
            counseling_required: false,
            counseling: None,
            allow_partial: false,
            service_fee: 0,
            totals: DispensingTotals::default(),
            prepared_by: None,
            verified_by: None,
            verification_notes: None,
            actual_ready_time: None,
            dispensed_by: None,
            recipient: None,
            dispensed_at: None,
            hold_reason: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DispensingId {
        self.id
    }

    pub fn dispensing_number(&self) -> &str {
        &self.dispensing_number
    }

    pub fn prescription_id(&self) -> PrescriptionId {
        self.prescription_id
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn status(&self) -> DispensingStatus {
        self.status
    }

    pub fn held_from(&self) -> Option<DispensingStatus> {
        self.held_from
    }

    pub fn items(&self) -> &[DispensingItem] {
        &self.items
    }

    pub fn item(&self, line_no: u32) -> Option<&DispensingItem> {
        self.items.iter().find(|i| i.line_no == line_no)
    }

    pub fn counseling_required(&self) -> bool {
        self.counseling_required
    }

    pub fn counseling(&self) -> Option<&PatientCounseling> {
        self.counseling.as_ref()
    }

    pub fn counseling_completed(&self) -> bool {
        self.counseling.is_some()
    }

    pub fn allows_partial(&self) -> bool {
        self.allow_partial
    }

    pub fn totals(&self) -> DispensingTotals {
        self.totals
    }

    pub fn verified_by(&self) -> Option<UserId> {
        self.verified_by
    }

    pub fn actual_ready_time(&self) -> Option<DateTime<Utc>> {
        self.actual_ready_time
    }

    pub fn dispensed_by(&self) -> Option<UserId> {
        self.dispensed_by
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn hold_reason(&self) -> Option<&str> {
        self.hold_reason.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    /// Whether any item was dispensed short of the prescribed quantity.
    pub fn is_partial(&self) -> bool {
        self.items.iter().any(DispensingItem::is_short)
    }

    /// Every reservation currently held for this dispensing.
    pub fn outstanding_allocations(&self) -> Vec<AllocationLine> {
        if self.status.is_final() {
            return Vec::new();
        }
        self.items
            .iter()
            .flat_map(|i| i.allocations.iter().cloned())
            .collect()
    }

    /// Quantities handed over, per prescription line.
    pub fn dispensed_lines(&self) -> Vec<LineQuantity> {
        self.items
            .iter()
            .map(|i| LineQuantity {
                line_no: i.line_no,
                quantity: i.dispensed_quantity,
            })
            .collect()
    }

    fn recompute_totals(&mut self) {
        let subtotal: i64 = self.items.iter().map(DispensingItem::line_total).sum();
        self.totals = DispensingTotals {
            total_items: self.items.len() as i64,
            total_quantity: self.items.iter().map(|i| i.dispensed_quantity).sum(),
            subtotal,
            service_fee: self.service_fee,
            total_amount: subtotal + self.service_fee,
        };
    }

    fn item_mut(&mut self, line_no: u32) -> Option<&mut DispensingItem> {
        self.items.iter_mut().find(|i| i.line_no == line_no)
    }
}

impl AggregateRoot for Dispensing {
    type Id = DispensingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateDispensing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDispensing {
    pub dispensing_id: DispensingId,
    pub dispensing_number: String,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub location_id: LocationId,
    pub items: Vec<NewDispensingItem>,
    pub counseling_requested: bool,
    /// Configuration switch: controlled/high-alert items force counseling.
    pub counseling_for_dual_check_items: bool,
    pub allow_partial: bool,
    pub service_fee: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StartPreparing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPreparing {
    pub dispensing_id: DispensingId,
    pub prepared_by: UserId,
    pub allocations: Vec<ItemAllocation>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitForVerification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitForVerification {
    pub dispensing_id: DispensingId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VerifyDispensing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDispensing {
    pub dispensing_id: DispensingId,
    pub pharmacist: UserId,
    pub passed: bool,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubstituteItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstituteItem {
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub substitute_drug_id: DrugId,
    pub reason: String,
    pub unit_price: i64,
    pub allocation: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteCounseling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteCounseling {
    pub dispensing_id: DispensingId,
    pub pharmacist: UserId,
    pub topics: Vec<String>,
    pub notes: Option<String>,
    pub understanding_confirmed: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Dispense (hand-over to the patient or a representative).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispense {
    pub dispensing_id: DispensingId,
    pub pharmacist: UserId,
    pub recipient: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: PutOnHold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOnHold {
    pub dispensing_id: DispensingId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResumeDispensing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeDispensing {
    pub dispensing_id: DispensingId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelDispensing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDispensing {
    pub dispensing_id: DispensingId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordItemReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordItemReturn {
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReverseItemReturn (undo a recorded return whose approval failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseItemReturn {
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispensingCommand {
    CreateDispensing(CreateDispensing),
    StartPreparing(StartPreparing),
    SubmitForVerification(SubmitForVerification),
    VerifyDispensing(VerifyDispensing),
    SubstituteItem(SubstituteItem),
    CompleteCounseling(CompleteCounseling),
    Dispense(Dispense),
    PutOnHold(PutOnHold),
    ResumeDispensing(ResumeDispensing),
    CancelDispensing(CancelDispensing),
    RecordItemReturn(RecordItemReturn),
    ReverseItemReturn(ReverseItemReturn),
}

impl Command for DispensingCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            DispensingCommand::CreateDispensing(c) => c.dispensing_id.0,
            DispensingCommand::StartPreparing(c) => c.dispensing_id.0,
            DispensingCommand::SubmitForVerification(c) => c.dispensing_id.0,
            DispensingCommand::VerifyDispensing(c) => c.dispensing_id.0,
            DispensingCommand::SubstituteItem(c) => c.dispensing_id.0,
            DispensingCommand::CompleteCounseling(c) => c.dispensing_id.0,
            DispensingCommand::Dispense(c) => c.dispensing_id.0,
            DispensingCommand::PutOnHold(c) => c.dispensing_id.0,
            DispensingCommand::ResumeDispensing(c) => c.dispensing_id.0,
            DispensingCommand::CancelDispensing(c) => c.dispensing_id.0,
            DispensingCommand::RecordItemReturn(c) => c.dispensing_id.0,
            DispensingCommand::ReverseItemReturn(c) => c.dispensing_id.0,
        }
    }
}

/// Event: DispensingCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingCreated {
    pub dispensing_id: DispensingId,
    pub dispensing_number: String,
    pub prescription_id: PrescriptionId,
    pub patient_id: PatientId,
    pub location_id: LocationId,
    pub items: Vec<NewDispensingItem>,
    pub counseling_required: bool,
    pub allow_partial: bool,
    pub service_fee: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PreparationStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationStarted {
    pub dispensing_id: DispensingId,
    pub prepared_by: UserId,
    pub allocations: Vec<ItemAllocation>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SubmittedForVerification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedForVerification {
    pub dispensing_id: DispensingId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensingVerified (passed or sent back to preparation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingVerified {
    pub dispensing_id: DispensingId,
    pub pharmacist: UserId,
    pub passed: bool,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemSubstituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSubstituted {
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub original_drug_id: DrugId,
    pub substitute_drug_id: DrugId,
    pub reason: String,
    pub unit_price: i64,
    pub allocation: Vec<AllocationLine>,
    /// Reservations of the original drug to release.
    pub released: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CounselingCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounselingCompleted {
    pub dispensing_id: DispensingId,
    pub counseling: PatientCounseling,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensingCompleted (handed over).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingCompleted {
    pub dispensing_id: DispensingId,
    pub pharmacist: UserId,
    pub recipient: String,
    /// Whether patient counseling was recorded before hand-over.
    pub counseled: bool,
    /// Reservations to consume.
    pub consumed: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensingPutOnHold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingPutOnHold {
    pub dispensing_id: DispensingId,
    pub from: DispensingStatus,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensingResumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingResumed {
    pub dispensing_id: DispensingId,
    pub to: DispensingStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensingCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensingCancelled {
    pub dispensing_id: DispensingId,
    pub cancelled_by: UserId,
    pub reason: String,
    /// Reservations to release.
    pub released: Vec<AllocationLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemReturnRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReturnRecorded {
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemReturnReversed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReturnReversed {
    pub dispensing_id: DispensingId,
    pub line_no: u32,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispensingEvent {
    DispensingCreated(DispensingCreated),
    PreparationStarted(PreparationStarted),
    SubmittedForVerification(SubmittedForVerification),
    DispensingVerified(DispensingVerified),
    ItemSubstituted(ItemSubstituted),
    CounselingCompleted(CounselingCompleted),
    DispensingCompleted(DispensingCompleted),
    DispensingPutOnHold(DispensingPutOnHold),
    DispensingResumed(DispensingResumed),
    DispensingCancelled(DispensingCancelled),
    ItemReturnRecorded(ItemReturnRecorded),
    ItemReturnReversed(ItemReturnReversed),
}

impl Event for DispensingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DispensingEvent::DispensingCreated(_) => "dispensing.dispensing.created",
            DispensingEvent::PreparationStarted(_) => "dispensing.dispensing.preparation_started",
            DispensingEvent::SubmittedForVerification(_) => {
                "dispensing.dispensing.submitted_for_verification"
            }
            DispensingEvent::DispensingVerified(_) => "dispensing.dispensing.verified",
            DispensingEvent::ItemSubstituted(_) => "dispensing.dispensing.item_substituted",
            DispensingEvent::CounselingCompleted(_) => "dispensing.dispensing.counseling_completed",
            DispensingEvent::DispensingCompleted(_) => "dispensing.dispensing.dispensed",
            DispensingEvent::DispensingPutOnHold(_) => "dispensing.dispensing.put_on_hold",
            DispensingEvent::DispensingResumed(_) => "dispensing.dispensing.resumed",
            DispensingEvent::DispensingCancelled(_) => "dispensing.dispensing.cancelled",
            DispensingEvent::ItemReturnRecorded(_) => "dispensing.dispensing.return_recorded",
            DispensingEvent::ItemReturnReversed(_) => "dispensing.dispensing.return_reversed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DispensingEvent::DispensingCreated(e) => e.occurred_at,
            DispensingEvent::PreparationStarted(e) => e.occurred_at,
            DispensingEvent::SubmittedForVerification(e) => e.occurred_at,
            DispensingEvent::DispensingVerified(e) => e.occurred_at,
            DispensingEvent::ItemSubstituted(e) => e.occurred_at,
            DispensingEvent::CounselingCompleted(e) => e.occurred_at,
            DispensingEvent::DispensingCompleted(e) => e.occurred_at,
            DispensingEvent::DispensingPutOnHold(e) => e.occurred_at,
            DispensingEvent::DispensingResumed(e) => e.occurred_at,
            DispensingEvent::DispensingCancelled(e) => e.occurred_at,
            DispensingEvent::ItemReturnRecorded(e) => e.occurred_at,
            DispensingEvent::ItemReturnReversed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Dispensing {
    type Command = DispensingCommand;
    type Event = DispensingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DispensingEvent::DispensingCreated(e) => {
                self.id = e.dispensing_id;
                self.dispensing_number = e.dispensing_number.clone();
                self.prescription_id = e.prescription_id;
                self.patient_id = e.patient_id;
                self.location_id = e.location_id;
                self.items = e
                    .items
                    .iter()
                    .map(|i| DispensingItem {
                        line_no: i.line_no,
                        drug_id: i.drug_id,
                        prescribed_quantity: i.quantity,
                        dispensed_quantity: i.quantity,
                        returned_quantity: 0,
                        unit_price: i.unit_price,
                        allocations: Vec::new(),
                        requires_dual_check: i.requires_dual_check,
                        substituted_from: None,
                        substitution_reason: None,
                    })
                    .collect();
                self.counseling_required = e.counseling_required;
                self.allow_partial = e.allow_partial;
                self.service_fee = e.service_fee;
                self.status = DispensingStatus::Queue;
                self.created = true;
            }
            DispensingEvent::PreparationStarted(e) => {
                for allocation in &e.allocations {
                    if let Some(item) = self.item_mut(allocation.line_no) {
                        item.allocations = allocation.lines.clone();
                        item.dispensed_quantity = allocation.quantity();
                    }
                }
                self.prepared_by = Some(e.prepared_by);
                self.status = DispensingStatus::Preparing;
            }
            DispensingEvent::SubmittedForVerification(_) => {
                self.status = DispensingStatus::Verification;
            }
            DispensingEvent::DispensingVerified(e) => {
                self.verification_notes = e.notes.clone();
                if e.passed {
                    self.verified_by = Some(e.pharmacist);
                    self.actual_ready_time = Some(e.occurred_at);
                    self.status = DispensingStatus::Ready;
                } else {
                    self.status = DispensingStatus::Preparing;
                }
            }
            DispensingEvent::ItemSubstituted(e) => {
                if let Some(item) = self.item_mut(e.line_no) {
                    item.substituted_from = Some(e.original_drug_id);
                    item.substitution_reason = Some(e.reason.clone());
                    item.drug_id = e.substitute_drug_id;
                    item.unit_price = e.unit_price;
                    item.dispensed_quantity = e.allocation.iter().map(|a| a.quantity).sum();
                    item.allocations = e.allocation.clone();
                }
            }
            DispensingEvent::CounselingCompleted(e) => {
                self.counseling = Some(e.counseling.clone());
            }
            DispensingEvent::DispensingCompleted(e) => {
                self.dispensed_by = Some(e.pharmacist);
                self.recipient = Some(e.recipient.clone());
                self.dispensed_at = Some(e.occurred_at);
                self.status = DispensingStatus::Dispensed;
            }
            DispensingEvent::DispensingPutOnHold(e) => {
                self.held_from = Some(e.from);
                self.hold_reason = Some(e.reason.clone());
                self.status = DispensingStatus::OnHold;
            }
            DispensingEvent::DispensingResumed(e) => {
                self.held_from = None;
                self.hold_reason = None;
                self.status = e.to;
            }
            DispensingEvent::DispensingCancelled(e) => {
                self.cancel_reason = Some(e.reason.clone());
                self.held_from = None;
                self.status = DispensingStatus::Cancelled;
            }
            DispensingEvent::ItemReturnRecorded(e) => {
                if let Some(item) = self.item_mut(e.line_no) {
                    item.returned_quantity += e.quantity;
                }
            }
            DispensingEvent::ItemReturnReversed(e) => {
                if let Some(item) = self.item_mut(e.line_no) {
                    item.returned_quantity -= e.quantity;
                }
            }
        }

        self.recompute_totals();
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DispensingCommand::CreateDispensing(cmd) => self.handle_create(cmd),
            DispensingCommand::StartPreparing(cmd) => self.handle_start_preparing(cmd),
            DispensingCommand::SubmitForVerification(cmd) => self.handle_submit(cmd),
            DispensingCommand::VerifyDispensing(cmd) => self.handle_verify(cmd),
            DispensingCommand::SubstituteItem(cmd) => self.handle_substitute(cmd),
            DispensingCommand::CompleteCounseling(cmd) => self.handle_counseling(cmd),
            DispensingCommand::Dispense(cmd) => self.handle_dispense(cmd),
            DispensingCommand::PutOnHold(cmd) => self.handle_hold(cmd),
            DispensingCommand::ResumeDispensing(cmd) => self.handle_resume(cmd),
            DispensingCommand::CancelDispensing(cmd) => self.handle_cancel(cmd),
            DispensingCommand::RecordItemReturn(cmd) => self.handle_record_return(cmd),
            DispensingCommand::ReverseItemReturn(cmd) => self.handle_reverse_return(cmd),
        }
    }
}

impl Dispensing {
    fn ensure_exists(&self, dispensing_id: DispensingId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != dispensing_id {
            return Err(DomainError::invariant("dispensing_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: DispensingStatus) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "dispensing is {:?}, expected {:?}",
                self.status, expected
            )));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.status.is_final() {
            return Err(DomainError::invalid_state(format!(
                "dispensing is already {:?}",
                self.status
            )));
        }
        Ok(())
    }

    /// Check an item's allocation against the fulfilment policy.
    fn check_allocated(&self, item: &DispensingItem, allocated: i64) -> Result<(), DomainError> {
        if allocated < 0 || allocated > item.prescribed_quantity {
            return Err(DomainError::invariant(format!(
                "line {} allocated {allocated} of {} prescribed",
                item.line_no, item.prescribed_quantity
            )));
        }
        if !self.allow_partial && allocated < item.prescribed_quantity {
            return Err(DomainError::insufficient_stock(item.prescribed_quantity, allocated));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateDispensing) -> Result<Vec<DispensingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("dispensing already exists"));
        }
        if cmd.dispensing_number.trim().is_empty() {
            return Err(DomainError::validation("dispensing number cannot be empty"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("dispensing has no items"));
        }
        if cmd.service_fee < 0 {
            return Err(DomainError::validation("service fee cannot be negative"));
        }
        for (idx, item) in cmd.items.iter().enumerate() {
            if item.quantity <= 0 {
                return Err(DomainError::validation("item quantity must be positive"));
            }
            if item.unit_price < 0 {
                return Err(DomainError::validation("unit price cannot be negative"));
            }
            if cmd.items[..idx].iter().any(|i| i.line_no == item.line_no) {
                return Err(DomainError::validation("prescription line listed twice"));
            }
        }

        let counseling_required = cmd.counseling_requested
            || (cmd.counseling_for_dual_check_items
                && cmd.items.iter().any(|i| i.requires_dual_check));

        Ok(vec![DispensingEvent::DispensingCreated(DispensingCreated {
            dispensing_id: cmd.dispensing_id,
            dispensing_number: cmd.dispensing_number.trim().to_string(),
            prescription_id: cmd.prescription_id,
            patient_id: cmd.patient_id,
            location_id: cmd.location_id,
            items: cmd.items.clone(),
            counseling_required,
            allow_partial: cmd.allow_partial,
            service_fee: cmd.service_fee,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_start_preparing(&self, cmd: &StartPreparing) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_status(DispensingStatus::Queue)?;

        let mut total = 0;
        for item in &self.items {
            let allocated = cmd
                .allocations
                .iter()
                .find(|a| a.line_no == item.line_no)
                .map(ItemAllocation::quantity)
                .unwrap_or(0);
            self.check_allocated(item, allocated)?;
            total += allocated;
        }
        if cmd
            .allocations
            .iter()
            .any(|a| self.item(a.line_no).is_none())
        {
            return Err(DomainError::invariant("allocation for an unknown line"));
        }
        if total == 0 {
            let requested = self.items.iter().map(|i| i.prescribed_quantity).sum();
            return Err(DomainError::insufficient_stock(requested, 0));
        }

        Ok(vec![DispensingEvent::PreparationStarted(PreparationStarted {
            dispensing_id: cmd.dispensing_id,
            prepared_by: cmd.prepared_by,
            allocations: cmd.allocations.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitForVerification) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_status(DispensingStatus::Preparing)?;
        Ok(vec![DispensingEvent::SubmittedForVerification(
            SubmittedForVerification {
                dispensing_id: cmd.dispensing_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_verify(&self, cmd: &VerifyDispensing) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_status(DispensingStatus::Verification)?;
        if !cmd.passed && cmd.notes.as_deref().is_none_or(|n| n.trim().is_empty()) {
            return Err(DomainError::validation("a failed verification needs notes"));
        }
        Ok(vec![DispensingEvent::DispensingVerified(DispensingVerified {
            dispensing_id: cmd.dispensing_id,
            pharmacist: cmd.pharmacist,
            passed: cmd.passed,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_substitute(&self, cmd: &SubstituteItem) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_status(DispensingStatus::Preparing)?;
        let item = self.item(cmd.line_no).ok_or_else(DomainError::not_found)?;
        if item.drug_id == cmd.substitute_drug_id {
            return Err(DomainError::validation("substitute must be a different drug"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("substitution reason is required"));
        }
        if cmd.unit_price < 0 {
            return Err(DomainError::validation("unit price cannot be negative"));
        }
        let allocated: i64 = cmd.allocation.iter().map(|a| a.quantity).sum();
        self.check_allocated(item, allocated)?;
        if allocated == 0 {
            return Err(DomainError::insufficient_stock(item.prescribed_quantity, 0));
        }

        Ok(vec![DispensingEvent::ItemSubstituted(ItemSubstituted {
            dispensing_id: cmd.dispensing_id,
            line_no: cmd.line_no,
            original_drug_id: item.drug_id,
            substitute_drug_id: cmd.substitute_drug_id,
            reason: cmd.reason.trim().to_string(),
            unit_price: cmd.unit_price,
            allocation: cmd.allocation.clone(),
            released: item.allocations.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_counseling(&self, cmd: &CompleteCounseling) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_open()?;
        if self.counseling.is_some() {
            return Err(DomainError::conflict("counseling already recorded"));
        }
        if cmd.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(DomainError::validation("counseling must cover at least one topic"));
        }
        if !cmd.understanding_confirmed {
            return Err(DomainError::validation("patient understanding was not confirmed"));
        }
        Ok(vec![DispensingEvent::CounselingCompleted(CounselingCompleted {
            dispensing_id: cmd.dispensing_id,
            counseling: PatientCounseling {
                pharmacist: cmd.pharmacist,
                topics: cmd
                    .topics
                    .iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
                notes: cmd.notes.clone(),
                understanding_confirmed: cmd.understanding_confirmed,
                completed_at: cmd.occurred_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispense(&self, cmd: &Dispense) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_status(DispensingStatus::Ready)?;
        if self.counseling_required && !self.counseling_completed() {
            return Err(DomainError::CounselingRequired);
        }
        if cmd.recipient.trim().is_empty() {
            return Err(DomainError::validation("recipient is required"));
        }
        Ok(vec![DispensingEvent::DispensingCompleted(DispensingCompleted {
            dispensing_id: cmd.dispensing_id,
            pharmacist: cmd.pharmacist,
            recipient: cmd.recipient.trim().to_string(),
            counseled: self.counseling_completed(),
            consumed: self.outstanding_allocations(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_hold(&self, cmd: &PutOnHold) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_open()?;
        if self.status == DispensingStatus::OnHold {
            return Err(DomainError::invalid_state("dispensing is already on hold"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("hold reason is required"));
        }
        Ok(vec![DispensingEvent::DispensingPutOnHold(DispensingPutOnHold {
            dispensing_id: cmd.dispensing_id,
            from: self.status,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resume(&self, cmd: &ResumeDispensing) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_status(DispensingStatus::OnHold)?;
        let to = self
            .held_from
            .ok_or_else(|| DomainError::invariant("on-hold dispensing without a prior state"))?;
        Ok(vec![DispensingEvent::DispensingResumed(DispensingResumed {
            dispensing_id: cmd.dispensing_id,
            to,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelDispensing) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_open()?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason is required"));
        }
        Ok(vec![DispensingEvent::DispensingCancelled(DispensingCancelled {
            dispensing_id: cmd.dispensing_id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.trim().to_string(),
            released: self.outstanding_allocations(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_return(&self, cmd: &RecordItemReturn) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        self.ensure_status(DispensingStatus::Dispensed)?;
        let item = self.item(cmd.line_no).ok_or_else(DomainError::not_found)?;
        if cmd.quantity <= 0 || cmd.quantity > item.returnable_quantity() {
            return Err(DomainError::validation(format!(
                "return of {} exceeds the {} unreturned units of line {}",
                cmd.quantity,
                item.returnable_quantity(),
                cmd.line_no
            )));
        }
        Ok(vec![DispensingEvent::ItemReturnRecorded(ItemReturnRecorded {
            dispensing_id: cmd.dispensing_id,
            line_no: cmd.line_no,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse_return(&self, cmd: &ReverseItemReturn) -> Result<Vec<DispensingEvent>, DomainError> {
        self.ensure_exists(cmd.dispensing_id)?;
        let item = self.item(cmd.line_no).ok_or_else(DomainError::not_found)?;
        if cmd.quantity <= 0 || cmd.quantity > item.returned_quantity {
            return Err(DomainError::validation(format!(
                "cannot reverse {} returned units of line {}: {} recorded",
                cmd.quantity, cmd.line_no, item.returned_quantity
            )));
        }
        Ok(vec![DispensingEvent::ItemReturnReversed(ItemReturnReversed {
            dispensing_id: cmd.dispensing_id,
            line_no: cmd.line_no,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
