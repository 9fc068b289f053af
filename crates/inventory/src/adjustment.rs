use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pharmledger_catalog::DrugId;
use pharmledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, typed_id};
use pharmledger_events::{Command, Event};

use crate::batch::BatchId;

typed_id!(
    /// Stock adjustment identifier.
    AdjustmentId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    CountCorrection,
    Damaged,
    Expired,
    Lost,
    Stolen,
    Found,
    Other,
}

impl AdjustmentReason {
    /// Whether the reason only makes sense for a stock decrease.
    pub fn is_write_off(&self) -> bool {
        matches!(
            self,
            AdjustmentReason::Damaged
                | AdjustmentReason::Expired
                | AdjustmentReason::Lost
                | AdjustmentReason::Stolen
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Pending,
    Approved,
    Applied,
    Rejected,
}

/// Aggregate root: StockAdjustment (a counted or written-off correction that
/// needs a second person's approval).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    id: AdjustmentId,
    batch_id: BatchId,
    drug_id: DrugId,
    delta: i64,
    reason: AdjustmentReason,
    notes: Option<String>,
    status: AdjustmentStatus,
    requested_by: Option<UserId>,
    approved_by: Option<UserId>,
    rejection_reason: Option<String>,
    movement_id: Option<Uuid>,
    version: u64,
    created: bool,
}

impl StockAdjustment {
    pub fn empty(id: AdjustmentId) -> Self {
        Self {
            id,
            batch_id: BatchId::new(AggregateId::default()),
            drug_id: DrugId::new(AggregateId::default()),
            delta: 0,
            reason: AdjustmentReason::Other,
            notes: None,
            status: AdjustmentStatus::Pending,
            requested_by: None,
            approved_by: None,
            rejection_reason: None,
            movement_id: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AdjustmentId {
        self.id
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn drug_id(&self) -> DrugId {
        self.drug_id
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    pub fn reason(&self) -> AdjustmentReason {
        self.reason
    }

    pub fn status(&self) -> AdjustmentStatus {
        self.status
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn movement_id(&self) -> Option<Uuid> {
        self.movement_id
    }
}

impl AggregateRoot for StockAdjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RequestAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAdjustment {
    pub adjustment_id: AdjustmentId,
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub notes: Option<String>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveAdjustment {
    pub adjustment_id: AdjustmentId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectAdjustment {
    pub adjustment_id: AdjustmentId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkAdjustmentApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkAdjustmentApplied {
    pub adjustment_id: AdjustmentId,
    pub movement_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentCommand {
    RequestAdjustment(RequestAdjustment),
    ApproveAdjustment(ApproveAdjustment),
    RejectAdjustment(RejectAdjustment),
    MarkAdjustmentApplied(MarkAdjustmentApplied),
}

impl Command for AdjustmentCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            AdjustmentCommand::RequestAdjustment(c) => c.adjustment_id.0,
            AdjustmentCommand::ApproveAdjustment(c) => c.adjustment_id.0,
            AdjustmentCommand::RejectAdjustment(c) => c.adjustment_id.0,
            AdjustmentCommand::MarkAdjustmentApplied(c) => c.adjustment_id.0,
        }
    }
}

/// Event: AdjustmentRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequested {
    pub adjustment_id: AdjustmentId,
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub delta: i64,
    pub reason: AdjustmentReason,
    pub notes: Option<String>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentApproved {
    pub adjustment_id: AdjustmentId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRejected {
    pub adjustment_id: AdjustmentId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentApplied {
    pub adjustment_id: AdjustmentId,
    pub movement_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentEvent {
    AdjustmentRequested(AdjustmentRequested),
    AdjustmentApproved(AdjustmentApproved),
    AdjustmentRejected(AdjustmentRejected),
    AdjustmentApplied(AdjustmentApplied),
}

impl Event for AdjustmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AdjustmentEvent::AdjustmentRequested(_) => "inventory.adjustment.requested",
            AdjustmentEvent::AdjustmentApproved(_) => "inventory.adjustment.approved",
            AdjustmentEvent::AdjustmentRejected(_) => "inventory.adjustment.rejected",
            AdjustmentEvent::AdjustmentApplied(_) => "inventory.adjustment.applied",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AdjustmentEvent::AdjustmentRequested(e) => e.occurred_at,
            AdjustmentEvent::AdjustmentApproved(e) => e.occurred_at,
            AdjustmentEvent::AdjustmentRejected(e) => e.occurred_at,
            AdjustmentEvent::AdjustmentApplied(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockAdjustment {
    type Command = AdjustmentCommand;
    type Event = AdjustmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AdjustmentEvent::AdjustmentRequested(e) => {
                self.id = e.adjustment_id;
                self.batch_id = e.batch_id;
                self.drug_id = e.drug_id;
                self.delta = e.delta;
                self.reason = e.reason;
                self.notes = e.notes.clone();
                self.requested_by = Some(e.requested_by);
                self.status = AdjustmentStatus::Pending;
                self.created = true;
            }
            AdjustmentEvent::AdjustmentApproved(e) => {
                self.status = AdjustmentStatus::Approved;
                self.approved_by = Some(e.approved_by);
            }
            AdjustmentEvent::AdjustmentRejected(e) => {
                self.status = AdjustmentStatus::Rejected;
                self.rejection_reason = Some(e.reason.clone());
            }
            AdjustmentEvent::AdjustmentApplied(e) => {
                self.status = AdjustmentStatus::Applied;
                self.movement_id = Some(e.movement_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AdjustmentCommand::RequestAdjustment(cmd) => self.handle_request(cmd),
            AdjustmentCommand::ApproveAdjustment(cmd) => self.handle_approve(cmd),
            AdjustmentCommand::RejectAdjustment(cmd) => self.handle_reject(cmd),
            AdjustmentCommand::MarkAdjustmentApplied(cmd) => self.handle_applied(cmd),
        }
    }
}

impl StockAdjustment {
    fn ensure_status(&self, adjustment_id: AdjustmentId, expected: AdjustmentStatus) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != adjustment_id {
            return Err(DomainError::invariant("adjustment_id mismatch"));
        }
        if self.status != expected {
            return Err(DomainError::invalid_state(format!(
                "adjustment is {:?}, expected {:?}",
                self.status, expected
            )));
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestAdjustment) -> Result<Vec<AdjustmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("adjustment already exists"));
        }
        if cmd.delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        if cmd.reason.is_write_off() && cmd.delta > 0 {
            return Err(DomainError::validation(format!(
                "{:?} adjustments can only reduce stock",
                cmd.reason
            )));
        }
        if cmd.reason == AdjustmentReason::Found && cmd.delta < 0 {
            return Err(DomainError::validation("found stock can only increase stock"));
        }
        let notes = cmd
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if cmd.reason == AdjustmentReason::Other && notes.is_none() {
            return Err(DomainError::validation("notes are required for other adjustments"));
        }

        Ok(vec![AdjustmentEvent::AdjustmentRequested(AdjustmentRequested {
            adjustment_id: cmd.adjustment_id,
            batch_id: cmd.batch_id,
            drug_id: cmd.drug_id,
            delta: cmd.delta,
            reason: cmd.reason,
            notes,
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveAdjustment) -> Result<Vec<AdjustmentEvent>, DomainError> {
        self.ensure_status(cmd.adjustment_id, AdjustmentStatus::Pending)?;
        if self.requested_by == Some(cmd.approved_by) {
            return Err(DomainError::Unauthorized);
        }
        Ok(vec![AdjustmentEvent::AdjustmentApproved(AdjustmentApproved {
            adjustment_id: cmd.adjustment_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectAdjustment) -> Result<Vec<AdjustmentEvent>, DomainError> {
        self.ensure_status(cmd.adjustment_id, AdjustmentStatus::Pending)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }
        Ok(vec![AdjustmentEvent::AdjustmentRejected(AdjustmentRejected {
            adjustment_id: cmd.adjustment_id,
            rejected_by: cmd.rejected_by,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_applied(&self, cmd: &MarkAdjustmentApplied) -> Result<Vec<AdjustmentEvent>, DomainError> {
        self.ensure_status(cmd.adjustment_id, AdjustmentStatus::Approved)?;
        Ok(vec![AdjustmentEvent::AdjustmentApplied(AdjustmentApplied {
            adjustment_id: cmd.adjustment_id,
            movement_id: cmd.movement_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmledger_events::execute;

    fn request(adjustment_id: AdjustmentId, delta: i64, reason: AdjustmentReason, requested_by: UserId) -> AdjustmentCommand {
        AdjustmentCommand::RequestAdjustment(RequestAdjustment {
            adjustment_id,
            batch_id: BatchId::generate(),
            drug_id: DrugId::generate(),
            delta,
            reason,
            notes: None,
            requested_by,
            occurred_at: Utc::now(),
        })
    }

    fn approve(adjustment_id: AdjustmentId, approved_by: UserId) -> AdjustmentCommand {
        AdjustmentCommand::ApproveAdjustment(ApproveAdjustment {
            adjustment_id,
            approved_by,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn requester_cannot_approve_own_adjustment() {
        let id = AdjustmentId::generate();
        let clerk = UserId::new();
        let mut adj = StockAdjustment::empty(id);
        execute(&mut adj, &request(id, -3, AdjustmentReason::Damaged, clerk)).unwrap();

        assert_eq!(adj.handle(&approve(id, clerk)).unwrap_err(), DomainError::Unauthorized);

        execute(&mut adj, &approve(id, UserId::new())).unwrap();
        assert_eq!(adj.status(), AdjustmentStatus::Approved);
    }

    #[test]
    fn write_off_reasons_must_reduce_stock() {
        let id = AdjustmentId::generate();
        let err = StockAdjustment::empty(id)
            .handle(&request(id, 5, AdjustmentReason::Stolen, UserId::new()))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn other_reason_requires_notes() {
        let id = AdjustmentId::generate();
        let adj = StockAdjustment::empty(id);
        assert!(adj.handle(&request(id, 2, AdjustmentReason::Other, UserId::new())).is_err());
        assert!(adj.handle(&request(id, 2, AdjustmentReason::CountCorrection, UserId::new())).is_ok());
    }

    #[test]
    fn applied_only_after_approval() {
        let id = AdjustmentId::generate();
        let mut adj = StockAdjustment::empty(id);
        execute(&mut adj, &request(id, 4, AdjustmentReason::Found, UserId::new())).unwrap();

        let mark = AdjustmentCommand::MarkAdjustmentApplied(MarkAdjustmentApplied {
            adjustment_id: id,
            movement_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
        });
        assert!(matches!(adj.handle(&mark).unwrap_err(), DomainError::InvalidState(_)));

        execute(&mut adj, &approve(id, UserId::new())).unwrap();
        execute(&mut adj, &mark).unwrap();
        assert_eq!(adj.status(), AdjustmentStatus::Applied);
        assert_eq!(adj.version(), 3);
    }
}
