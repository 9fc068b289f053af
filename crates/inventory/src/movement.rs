//! Append-only stock movement log.

use std::collections::HashSet;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pharmledger_catalog::DrugId;
use pharmledger_core::{AggregateId, DomainError, DomainResult};

use crate::batch::{BatchId, LocationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Receipt,
    Dispensing,
    Return,
    Adjustment,
    TransferIn,
    TransferOut,
}

/// Kind of business document a movement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Receipt,
    Dispensing,
    Return,
    Adjustment,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub kind: ReferenceKind,
    pub id: AggregateId,
}

impl MovementReference {
    pub fn new(kind: ReferenceKind, id: impl Into<AggregateId>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// One physical quantity change on one batch. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub drug_id: DrugId,
    pub batch_id: BatchId,
    pub location_id: LocationId,
    pub direction: MovementDirection,
    pub kind: MovementKind,
    /// Always positive; the sign comes from `direction`.
    pub quantity: i64,
    pub unit_cost: i64,
    pub reference: MovementReference,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        drug_id: DrugId,
        batch_id: BatchId,
        location_id: LocationId,
        direction: MovementDirection,
        kind: MovementKind,
        quantity: i64,
        unit_cost: i64,
        reference: MovementReference,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            drug_id,
            batch_id,
            location_id,
            direction,
            kind,
            quantity,
            unit_cost,
            reference,
            occurred_at,
        }
    }

    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            MovementDirection::Inbound => self.quantity,
            MovementDirection::Outbound => -self.quantity,
        }
    }

    pub fn total_cost(&self) -> i64 {
        self.quantity * self.unit_cost
    }
}

/// Movement persistence abstraction.
pub trait MovementLog: Send + Sync {
    /// Append movements. A movement id may be recorded only once.
    fn append(&self, movements: &[StockMovement]) -> DomainResult<()>;

    fn for_batch(&self, batch_id: BatchId) -> Vec<StockMovement>;

    fn for_drug(&self, drug_id: DrugId) -> Vec<StockMovement>;

    fn for_reference(&self, reference: &MovementReference) -> Vec<StockMovement>;

    /// Signed sum of all movements on a batch; equals its on-hand quantity.
    fn net_quantity_for_batch(&self, batch_id: BatchId) -> i64 {
        self.for_batch(batch_id)
            .iter()
            .map(StockMovement::signed_quantity)
            .sum()
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<StockMovement>,
    ids: HashSet<Uuid>,
}

/// In-memory movement log (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryMovementLog {
    inner: RwLock<LogState>,
}

impl InMemoryMovementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, predicate: impl Fn(&StockMovement) -> bool) -> Vec<StockMovement> {
        match self.inner.read() {
            Ok(s) => s.entries.iter().filter(|m| predicate(m)).cloned().collect(),
            Err(_) => vec![],
        }
    }
}

impl MovementLog for InMemoryMovementLog {
    fn append(&self, movements: &[StockMovement]) -> DomainResult<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| DomainError::invariant("movement log lock poisoned"))?;

        if let Some(dup) = movements.iter().find(|m| state.ids.contains(&m.id)) {
            return Err(DomainError::conflict(format!(
                "movement {} already recorded",
                dup.id
            )));
        }
        for m in movements {
            state.ids.insert(m.id);
            state.entries.push(m.clone());
        }
        Ok(())
    }

    fn for_batch(&self, batch_id: BatchId) -> Vec<StockMovement> {
        self.select(|m| m.batch_id == batch_id)
    }

    fn for_drug(&self, drug_id: DrugId) -> Vec<StockMovement> {
        self.select(|m| m.drug_id == drug_id)
    }

    fn for_reference(&self, reference: &MovementReference) -> Vec<StockMovement> {
        self.select(|m| &m.reference == reference)
    }
}

impl<L> MovementLog for std::sync::Arc<L>
where
    L: MovementLog + ?Sized,
{
    fn append(&self, movements: &[StockMovement]) -> DomainResult<()> {
        (**self).append(movements)
    }

    fn for_batch(&self, batch_id: BatchId) -> Vec<StockMovement> {
        (**self).for_batch(batch_id)
    }

    fn for_drug(&self, drug_id: DrugId) -> Vec<StockMovement> {
        (**self).for_drug(drug_id)
    }

    fn for_reference(&self, reference: &MovementReference) -> Vec<StockMovement> {
        (**self).for_reference(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(batch_id: BatchId, direction: MovementDirection, quantity: i64) -> StockMovement {
        StockMovement::new(
            DrugId::generate(),
            batch_id,
            LocationId::generate(),
            direction,
            MovementKind::Adjustment,
            quantity,
            100,
            MovementReference::new(ReferenceKind::Adjustment, AggregateId::new()),
            Utc::now(),
        )
    }

    #[test]
    fn net_quantity_sums_signed_movements() {
        let log = InMemoryMovementLog::new();
        let batch = BatchId::generate();
        log.append(&[
            movement(batch, MovementDirection::Inbound, 30),
            movement(batch, MovementDirection::Outbound, 12),
            movement(BatchId::generate(), MovementDirection::Inbound, 99),
        ])
        .unwrap();

        assert_eq!(log.net_quantity_for_batch(batch), 18);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn duplicate_movement_ids_are_rejected_without_partial_append() {
        let log = InMemoryMovementLog::new();
        let m = movement(BatchId::generate(), MovementDirection::Inbound, 5);
        log.append(std::slice::from_ref(&m)).unwrap();

        let fresh = movement(BatchId::generate(), MovementDirection::Inbound, 1);
        let err = log.append(&[fresh, m]).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn movements_are_queryable_by_reference() {
        let log = InMemoryMovementLog::new();
        let m = movement(BatchId::generate(), MovementDirection::Outbound, 2);
        let reference = m.reference;
        log.append(&[m, movement(BatchId::generate(), MovementDirection::Inbound, 1)])
            .unwrap();
        assert_eq!(log.for_reference(&reference).len(), 1);
    }
}
