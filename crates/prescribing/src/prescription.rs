use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmledger_catalog::DrugId;
use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, typed_id};
use pharmledger_events::{Command, Event};

use crate::dosage::Dosage;

typed_id!(
    /// Prescription identifier.
    PrescriptionId
);

typed_id!(
    /// Patient identifier (owned by the patient registry).
    PatientId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Draft,
    PendingVerification,
    Verified,
    Dispensed,
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

/// Clinical checks a pharmacist performs before verifying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub interactions_checked: bool,
    pub dosage_checked: bool,
    pub allergies_checked: bool,
}

impl VerificationChecks {
    pub fn all() -> Self {
        Self {
            interactions_checked: true,
            dosage_checked: true,
            allergies_checked: true,
        }
    }

    pub fn all_performed(&self) -> bool {
        self.interactions_checked && self.dosage_checked && self.allergies_checked
    }
}

/// One recorded verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionVerification {
    pub pharmacist: UserId,
    pub checks: VerificationChecks,
    pub notes: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionItem {
    pub line_no: u32,
    pub drug_id: DrugId,
    pub dosage: Dosage,
    pub instructions: Option<String>,
    /// Controlled or high-alert at the time of prescribing.
    pub requires_dual_check: bool,
    pub required_quantity: i64,
    pub dispensed_quantity: i64,
}

impl PrescriptionItem {
    pub fn is_fully_dispensed(&self) -> bool {
        self.dispensed_quantity >= self.required_quantity
    }
}

/// A line quantity reference used by claims and dispensing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuantity {
    pub line_no: u32,
    pub quantity: i64,
}

/// Quantity of a line held by an open dispensing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemClaim {
    pub dispensing_id: AggregateId,
    pub line_no: u32,
    pub quantity: i64,
}

/// Aggregate root: Prescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prescription {
    id: PrescriptionId,
    prescription_number: String,
    patient_id: PatientId,
    prescriber_id: Option<UserId>,
    priority: Priority,
    valid_until: DateTime<Utc>,
    status: PrescriptionStatus,
    items: Vec<PrescriptionItem>,
    claims: Vec<ItemClaim>,
    verifications: Vec<PrescriptionVerification>,
    rejection_reason: Option<String>,
    dispensed_by: Option<UserId>,
    version: u64,
    created: bool,
}

impl Prescription {
    pub fn empty(id: PrescriptionId) -> Self {
        Self {
            id,
            prescription_number: String::new(),
            patient_id: PatientId::new(AggregateId::default()),
            prescriber_id: None,
            priority: Priority::Routine,
            valid_until: DateTime::<Utc>::MIN_UTC,
            status: PrescriptionStatus::Draft,
            items: Vec::new(),
            claims: Vec::new(),
            verifications: Vec::new(),
            rejection_reason: None,
            dispensed_by: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PrescriptionId {
        self.id
    }

    pub fn prescription_number(&self) -> &str {
        &self.prescription_number
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    pub fn status(&self) -> PrescriptionStatus {
        self.status
    }

    pub fn items(&self) -> &[PrescriptionItem] {
        &self.items
    }

    pub fn item(&self, line_no: u32) -> Option<&PrescriptionItem> {
        self.items.iter().find(|i| i.line_no == line_no)
    }

    pub fn claims(&self) -> &[ItemClaim] {
        &self.claims
    }

    pub fn verifications(&self) -> &[PrescriptionVerification] {
        &self.verifications
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn dispensed_by(&self) -> Option<UserId> {
        self.dispensed_by
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    /// Whether any line needs the dual-check regime.
    pub fn has_dual_check_items(&self) -> bool {
        self.items.iter().any(|i| i.requires_dual_check)
    }

    /// Quantity of a line currently held by open dispensings.
    pub fn claimed_quantity(&self, line_no: u32) -> i64 {
        self.claims
            .iter()
            .filter(|c| c.line_no == line_no)
            .map(|c| c.quantity)
            .sum()
    }

    /// Quantity of a line still available to claim.
    pub fn claimable_quantity(&self, line_no: u32) -> i64 {
        self.item(line_no)
            .map(|i| (i.required_quantity - i.dispensed_quantity - self.claimed_quantity(line_no)).max(0))
            .unwrap_or(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    /// Query-time guard: verified and still within its validity window.
    pub fn is_dispensable(&self, now: DateTime<Utc>) -> bool {
        self.created && self.status == PrescriptionStatus::Verified && !self.is_expired(now)
    }

    pub fn is_fully_dispensed(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(PrescriptionItem::is_fully_dispensed)
    }
}

impl AggregateRoot for Prescription {
    type Id = PrescriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePrescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrescription {
    pub prescription_id: PrescriptionId,
    pub prescription_number: String,
    pub patient_id: PatientId,
    pub prescriber_id: UserId,
    pub priority: Priority,
    pub valid_until: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddPrescriptionItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPrescriptionItem {
    pub prescription_id: PrescriptionId,
    pub drug_id: DrugId,
    pub dosage: Dosage,
    pub instructions: Option<String>,
    pub requires_dual_check: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitPrescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPrescription {
    pub prescription_id: PrescriptionId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: VerifyPrescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPrescription {
    pub prescription_id: PrescriptionId,
    pub pharmacist: UserId,
    pub checks: VerificationChecks,
    pub notes: Option<String>,
    /// Configuration switch: dual-check lines need two pharmacists.
    pub dual_verification_enabled: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectPrescription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPrescription {
    pub prescription_id: PrescriptionId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClaimItems (a dispensing takes hold of line quantities).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimItems {
    pub prescription_id: PrescriptionId,
    pub dispensing_id: AggregateId,
    pub lines: Vec<LineQuantity>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseClaim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseClaim {
    pub prescription_id: PrescriptionId,
    pub dispensing_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDispensed (a claim is settled with handed-over quantities).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDispensed {
    pub prescription_id: PrescriptionId,
    pub dispensing_id: AggregateId,
    pub lines: Vec<LineQuantity>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPrescriptionDispensed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPrescriptionDispensed {
    pub prescription_id: PrescriptionId,
    pub pharmacist: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionCommand {
    CreatePrescription(CreatePrescription),
    AddPrescriptionItem(AddPrescriptionItem),
    SubmitPrescription(SubmitPrescription),
    VerifyPrescription(VerifyPrescription),
    RejectPrescription(RejectPrescription),
    ClaimItems(ClaimItems),
    ReleaseClaim(ReleaseClaim),
    RecordDispensed(RecordDispensed),
    MarkPrescriptionDispensed(MarkPrescriptionDispensed),
}

impl Command for PrescriptionCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            PrescriptionCommand::CreatePrescription(c) => c.prescription_id.0,
            PrescriptionCommand::AddPrescriptionItem(c) => c.prescription_id.0,
            PrescriptionCommand::SubmitPrescription(c) => c.prescription_id.0,
            PrescriptionCommand::VerifyPrescription(c) => c.prescription_id.0,
            PrescriptionCommand::RejectPrescription(c) => c.prescription_id.0,
            PrescriptionCommand::ClaimItems(c) => c.prescription_id.0,
            PrescriptionCommand::ReleaseClaim(c) => c.prescription_id.0,
            PrescriptionCommand::RecordDispensed(c) => c.prescription_id.0,
            PrescriptionCommand::MarkPrescriptionDispensed(c) => c.prescription_id.0,
        }
    }
}

/// Event: PrescriptionCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionCreated {
    pub prescription_id: PrescriptionId,
    pub prescription_number: String,
    pub patient_id: PatientId,
    pub prescriber_id: UserId,
    pub priority: Priority,
    pub valid_until: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrescriptionItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionItemAdded {
    pub prescription_id: PrescriptionId,
    pub item: PrescriptionItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrescriptionSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionSubmitted {
    pub prescription_id: PrescriptionId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrescriptionVerified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionVerified {
    pub prescription_id: PrescriptionId,
    pub verification: PrescriptionVerification,
    /// `false` while a second, independent verification is outstanding.
    pub fully_verified: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrescriptionRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionRejected {
    pub prescription_id: PrescriptionId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsClaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsClaimed {
    pub prescription_id: PrescriptionId,
    pub claims: Vec<ItemClaim>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ClaimReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReleased {
    pub prescription_id: PrescriptionId,
    pub dispensing_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DispensedQuantitiesRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispensedQuantitiesRecorded {
    pub prescription_id: PrescriptionId,
    pub dispensing_id: AggregateId,
    pub lines: Vec<LineQuantity>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PrescriptionDispensed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionDispensed {
    pub prescription_id: PrescriptionId,
    pub pharmacist: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrescriptionEvent {
    PrescriptionCreated(PrescriptionCreated),
    PrescriptionItemAdded(PrescriptionItemAdded),
    PrescriptionSubmitted(PrescriptionSubmitted),
    PrescriptionVerified(PrescriptionVerified),
    PrescriptionRejected(PrescriptionRejected),
    ItemsClaimed(ItemsClaimed),
    ClaimReleased(ClaimReleased),
    DispensedQuantitiesRecorded(DispensedQuantitiesRecorded),
    PrescriptionDispensed(PrescriptionDispensed),
}

impl Event for PrescriptionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PrescriptionEvent::PrescriptionCreated(_) => "prescribing.prescription.created",
            PrescriptionEvent::PrescriptionItemAdded(_) => "prescribing.prescription.item_added",
            PrescriptionEvent::PrescriptionSubmitted(_) => "prescribing.prescription.submitted",
            PrescriptionEvent::PrescriptionVerified(_) => "prescribing.prescription.verified",
            PrescriptionEvent::PrescriptionRejected(_) => "prescribing.prescription.rejected",
            PrescriptionEvent::ItemsClaimed(_) => "prescribing.prescription.items_claimed",
            PrescriptionEvent::ClaimReleased(_) => "prescribing.prescription.claim_released",
            PrescriptionEvent::DispensedQuantitiesRecorded(_) => {
                "prescribing.prescription.dispensed_recorded"
            }
            PrescriptionEvent::PrescriptionDispensed(_) => "prescribing.prescription.dispensed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PrescriptionEvent::PrescriptionCreated(e) => e.occurred_at,
            PrescriptionEvent::PrescriptionItemAdded(e) => e.occurred_at,
            PrescriptionEvent::PrescriptionSubmitted(e) => e.occurred_at,
            PrescriptionEvent::PrescriptionVerified(e) => e.occurred_at,
            PrescriptionEvent::PrescriptionRejected(e) => e.occurred_at,
            PrescriptionEvent::ItemsClaimed(e) => e.occurred_at,
            PrescriptionEvent::ClaimReleased(e) => e.occurred_at,
            PrescriptionEvent::DispensedQuantitiesRecorded(e) => e.occurred_at,
            PrescriptionEvent::PrescriptionDispensed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Prescription {
    type Command = PrescriptionCommand;
    type Event = PrescriptionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PrescriptionEvent::PrescriptionCreated(e) => {
                self.id = e.prescription_id;
                self.prescription_number = e.prescription_number.clone();
                self.patient_id = e.patient_id;
                self.prescriber_id = Some(e.prescriber_id);
                self.priority = e.priority;
                self.valid_until = e.valid_until;
                self.status = PrescriptionStatus::Draft;
                self.created = true;
            }
            PrescriptionEvent::PrescriptionItemAdded(e) => {
                self.items.push(e.item.clone());
            }
            PrescriptionEvent::PrescriptionSubmitted(_) => {
                self.status = PrescriptionStatus::PendingVerification;
            }
            PrescriptionEvent::PrescriptionVerified(e) => {
                self.verifications.push(e.verification.clone());
                if e.fully_verified {
                    self.status = PrescriptionStatus::Verified;
                }
            }
            PrescriptionEvent::PrescriptionRejected(e) => {
                self.status = PrescriptionStatus::Rejected;
                self.rejection_reason = Some(e.reason.clone());
            }
            PrescriptionEvent::ItemsClaimed(e) => {
                self.claims.extend(e.claims.iter().copied());
            }
            PrescriptionEvent::ClaimReleased(e) => {
                self.claims.retain(|c| c.dispensing_id != e.dispensing_id);
            }
            PrescriptionEvent::DispensedQuantitiesRecorded(e) => {
                for line in &e.lines {
                    if let Some(item) = self.items.iter_mut().find(|i| i.line_no == line.line_no) {
                        item.dispensed_quantity += line.quantity;
                    }
                }
                self.claims.retain(|c| c.dispensing_id != e.dispensing_id);
            }
            PrescriptionEvent::PrescriptionDispensed(e) => {
                self.status = PrescriptionStatus::Dispensed;
                self.dispensed_by = Some(e.pharmacist);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PrescriptionCommand::CreatePrescription(cmd) => self.handle_create(cmd),
            PrescriptionCommand::AddPrescriptionItem(cmd) => self.handle_add_item(cmd),
            PrescriptionCommand::SubmitPrescription(cmd) => self.handle_submit(cmd),
            PrescriptionCommand::VerifyPrescription(cmd) => self.handle_verify(cmd),
            PrescriptionCommand::RejectPrescription(cmd) => self.handle_reject(cmd),
            PrescriptionCommand::ClaimItems(cmd) => self.handle_claim(cmd),
            PrescriptionCommand::ReleaseClaim(cmd) => self.handle_release_claim(cmd),
            PrescriptionCommand::RecordDispensed(cmd) => self.handle_record_dispensed(cmd),
            PrescriptionCommand::MarkPrescriptionDispensed(cmd) => self.handle_mark_dispensed(cmd),
        }
    }
}

impl Prescription {
    fn ensure_exists(&self, prescription_id: PrescriptionId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != prescription_id {
            return Err(DomainError::invariant("prescription_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: PrescriptionStatus) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "prescription is {:?}, expected {:?}",
                self.status, expected
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePrescription) -> Result<Vec<PrescriptionEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("prescription already exists"));
        }
        if cmd.prescription_number.trim().is_empty() {
            return Err(DomainError::validation("prescription number cannot be empty"));
        }
        if cmd.valid_until <= cmd.occurred_at {
            return Err(DomainError::validation("valid-until must be in the future"));
        }
        Ok(vec![PrescriptionEvent::PrescriptionCreated(PrescriptionCreated {
            prescription_id: cmd.prescription_id,
            prescription_number: cmd.prescription_number.trim().to_string(),
            patient_id: cmd.patient_id,
            prescriber_id: cmd.prescriber_id,
            priority: cmd.priority,
            valid_until: cmd.valid_until,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddPrescriptionItem) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        self.ensure_status(PrescriptionStatus::Draft)?;
        let required_quantity = cmd.dosage.required_quantity()?;
        let line_no = self.items.iter().map(|i| i.line_no).max().unwrap_or(0) + 1;

        Ok(vec![PrescriptionEvent::PrescriptionItemAdded(PrescriptionItemAdded {
            prescription_id: cmd.prescription_id,
            item: PrescriptionItem {
                line_no,
                drug_id: cmd.drug_id,
                dosage: cmd.dosage,
                instructions: cmd.instructions.clone(),
                requires_dual_check: cmd.requires_dual_check,
                required_quantity,
                dispensed_quantity: 0,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitPrescription) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        self.ensure_status(PrescriptionStatus::Draft)?;
        if self.items.is_empty() {
            return Err(DomainError::validation("prescription has no items"));
        }
        Ok(vec![PrescriptionEvent::PrescriptionSubmitted(PrescriptionSubmitted {
            prescription_id: cmd.prescription_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_verify(&self, cmd: &VerifyPrescription) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        self.ensure_status(PrescriptionStatus::PendingVerification)?;
        if !cmd.checks.all_performed() {
            return Err(DomainError::validation(
                "interaction, dosage and allergy checks must all be performed",
            ));
        }

        let needs_second = cmd.dual_verification_enabled && self.has_dual_check_items();
        if needs_second && self.verifications.iter().any(|v| v.pharmacist == cmd.pharmacist) {
            return Err(DomainError::conflict(
                "second verification must be by a different pharmacist",
            ));
        }
        let fully_verified = !needs_second || !self.verifications.is_empty();

        Ok(vec![PrescriptionEvent::PrescriptionVerified(PrescriptionVerified {
            prescription_id: cmd.prescription_id,
            verification: PrescriptionVerification {
                pharmacist: cmd.pharmacist,
                checks: cmd.checks,
                notes: cmd.notes.clone(),
                verified_at: cmd.occurred_at,
            },
            fully_verified,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectPrescription) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        if !matches!(
            self.status,
            PrescriptionStatus::PendingVerification | PrescriptionStatus::Verified
        ) {
            return Err(DomainError::invalid_state(format!(
                "prescription is {:?} and cannot be rejected",
                self.status
            )));
        }
        if !self.claims.is_empty() {
            return Err(DomainError::invalid_state(
                "prescription has open dispensings; cancel them first",
            ));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }
        Ok(vec![PrescriptionEvent::PrescriptionRejected(PrescriptionRejected {
            prescription_id: cmd.prescription_id,
            rejected_by: cmd.rejected_by,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_claim(&self, cmd: &ClaimItems) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        self.ensure_status(PrescriptionStatus::Verified)?;
        if self.is_expired(cmd.occurred_at) {
            return Err(DomainError::invalid_state("prescription has expired"));
        }
        if self.claims.iter().any(|c| c.dispensing_id == cmd.dispensing_id) {
            return Err(DomainError::conflict("dispensing already holds a claim"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("claim has no lines"));
        }

        let mut claims = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation("claimed quantity must be positive"));
            }
            if claims.iter().any(|c: &ItemClaim| c.line_no == line.line_no) {
                return Err(DomainError::validation("line claimed twice in one request"));
            }
            if self.item(line.line_no).is_none() {
                return Err(DomainError::not_found());
            }
            let claimable = self.claimable_quantity(line.line_no);
            if line.quantity > claimable {
                return Err(DomainError::invalid_state(format!(
                    "line {} has {claimable} left to dispense, {} requested",
                    line.line_no, line.quantity
                )));
            }
            claims.push(ItemClaim {
                dispensing_id: cmd.dispensing_id,
                line_no: line.line_no,
                quantity: line.quantity,
            });
        }

        Ok(vec![PrescriptionEvent::ItemsClaimed(ItemsClaimed {
            prescription_id: cmd.prescription_id,
            claims,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release_claim(&self, cmd: &ReleaseClaim) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        if !self.claims.iter().any(|c| c.dispensing_id == cmd.dispensing_id) {
            return Ok(vec![]);
        }
        Ok(vec![PrescriptionEvent::ClaimReleased(ClaimReleased {
            prescription_id: cmd.prescription_id,
            dispensing_id: cmd.dispensing_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_dispensed(&self, cmd: &RecordDispensed) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        self.ensure_status(PrescriptionStatus::Verified)?;
        for line in &cmd.lines {
            let held: i64 = self
                .claims
                .iter()
                .filter(|c| c.dispensing_id == cmd.dispensing_id && c.line_no == line.line_no)
                .map(|c| c.quantity)
                .sum();
            if line.quantity < 0 || line.quantity > held {
                return Err(DomainError::invalid_state(format!(
                    "line {} dispensed {} against a claim of {held}",
                    line.line_no, line.quantity
                )));
            }
        }
        Ok(vec![PrescriptionEvent::DispensedQuantitiesRecorded(
            DispensedQuantitiesRecorded {
                prescription_id: cmd.prescription_id,
                dispensing_id: cmd.dispensing_id,
                lines: cmd.lines.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_mark_dispensed(&self, cmd: &MarkPrescriptionDispensed) -> Result<Vec<PrescriptionEvent>, DomainError> {
        self.ensure_exists(cmd.prescription_id)?;
        self.ensure_status(PrescriptionStatus::Verified)?;
        if !self.is_fully_dispensed() {
            return Err(DomainError::invalid_state(
                "not every item has been fully dispensed",
            ));
        }
        Ok(vec![PrescriptionEvent::PrescriptionDispensed(PrescriptionDispensed {
            prescription_id: cmd.prescription_id,
            pharmacist: cmd.pharmacist,
            occurred_at: cmd.occurred_at,
        })])
    }
}
