//! Stock batch state and its pure quantity mutations.
//!
//! Every mutation takes the current batch by reference and returns a
//! [`BatchMutation`]: the next state plus the movements it emits. Nothing is
//! written here; the ledger persists the result with a version check.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pharmledger_catalog::{DrugId, SupplierId};
use pharmledger_core::{AggregateId, DomainError, DomainResult, typed_id};

use crate::movement::{MovementDirection, MovementKind, MovementReference, StockMovement};

typed_id!(
    /// Stock batch (lot at one location) identifier.
    BatchId
);

typed_id!(
    /// Storage location identifier (main store, ward depot, ...).
    LocationId
);

const LOT_NAMESPACE: Uuid = Uuid::from_u128(0x5d2c_81f4_0b7e_4a93_9e16_c3a8_74f0_2b5d);

impl BatchId {
    /// Id of the lot with this drug, location and batch number. Every writer
    /// derives the same id for the same lot.
    pub fn for_lot(drug_id: DrugId, location_id: LocationId, batch_number: &str) -> Self {
        let key = format!("{drug_id}/{location_id}/{}", batch_number.trim());
        Self(AggregateId::from_uuid(Uuid::new_v5(&LOT_NAMESPACE, key.as_bytes())))
    }
}

/// One manufactured lot of one drug at one location.
///
/// Invariant: `on_hand == available + reserved + quarantined`, every bucket is
/// non-negative, and a batch with nothing on hand is inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    id: BatchId,
    drug_id: DrugId,
    location_id: LocationId,
    batch_number: String,
    expiry_date: NaiveDate,
    received_at: DateTime<Utc>,
    unit_cost: i64,
    supplier_id: Option<SupplierId>,
    initial_quantity: i64,
    quantity_on_hand: i64,
    quantity_available: i64,
    quantity_reserved: i64,
    quantity_quarantined: i64,
    is_quarantined: bool,
    quarantine_reason: Option<String>,
    is_expired: bool,
    active: bool,
}

/// Stock arriving at a location, either as a new lot or a top-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingStock {
    pub drug_id: DrugId,
    pub location_id: LocationId,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    /// Cost per dispensing unit, smallest currency unit.
    pub unit_cost: i64,
    pub supplier_id: Option<SupplierId>,
}

/// Result of a batch mutation: next state + emitted movements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMutation {
    pub batch: StockBatch,
    pub movements: Vec<StockMovement>,
}

impl BatchMutation {
    fn state_only(batch: StockBatch) -> Self {
        Self {
            batch,
            movements: Vec::new(),
        }
    }

    /// Stamp the emitted movement with an id chosen by the caller.
    pub fn with_movement_id(mut self, movement_id: Uuid) -> Self {
        for movement in &mut self.movements {
            movement.id = movement_id;
        }
        self
    }
}

fn ensure_positive(qty: i64) -> DomainResult<()> {
    if qty <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    Ok(())
}

impl StockBatch {
    /// Create a new batch from incoming stock, emitting its first movement.
    pub fn receive(
        id: BatchId,
        incoming: &IncomingStock,
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<BatchMutation> {
        ensure_positive(incoming.quantity)?;
        if incoming.batch_number.trim().is_empty() {
            return Err(DomainError::validation("batch number cannot be empty"));
        }
        if incoming.unit_cost < 0 {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }

        let batch = StockBatch {
            id,
            drug_id: incoming.drug_id,
            location_id: incoming.location_id,
            batch_number: incoming.batch_number.trim().to_string(),
            expiry_date: incoming.expiry_date,
            received_at: at,
            unit_cost: incoming.unit_cost,
            supplier_id: incoming.supplier_id,
            initial_quantity: incoming.quantity,
            quantity_on_hand: incoming.quantity,
            quantity_available: incoming.quantity,
            quantity_reserved: 0,
            quantity_quarantined: 0,
            is_quarantined: false,
            quarantine_reason: None,
            is_expired: incoming.expiry_date < at.date_naive(),
            active: true,
        };
        batch.verify()?;

        let movement = batch.movement(MovementDirection::Inbound, kind, incoming.quantity, reference, at);
        Ok(BatchMutation {
            batch,
            movements: vec![movement],
        })
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn drug_id(&self) -> DrugId {
        self.drug_id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn batch_number(&self) -> &str {
        &self.batch_number
    }

    pub fn expiry_date(&self) -> NaiveDate {
        self.expiry_date
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn unit_cost(&self) -> i64 {
        self.unit_cost
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn initial_quantity(&self) -> i64 {
        self.initial_quantity
    }

    pub fn quantity_on_hand(&self) -> i64 {
        self.quantity_on_hand
    }

    pub fn quantity_available(&self) -> i64 {
        self.quantity_available
    }

    pub fn quantity_reserved(&self) -> i64 {
        self.quantity_reserved
    }

    pub fn quantity_quarantined(&self) -> i64 {
        self.quantity_quarantined
    }

    pub fn is_quarantined(&self) -> bool {
        self.is_quarantined
    }

    pub fn quarantine_reason(&self) -> Option<&str> {
        self.quarantine_reason.as_deref()
    }

    /// Expired flag as of the last `check_expired` evaluation.
    pub fn is_expired(&self) -> bool {
        self.is_expired
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Value of the on-hand quantity at cost.
    pub fn total_cost(&self) -> i64 {
        self.quantity_on_hand * self.unit_cost
    }

    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }

    /// A lot is usable through its expiry date and expired the day after.
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expiry_date < today
    }

    /// Refresh the expired flag against `today` (pure, idempotent).
    pub fn check_expired(&self, today: NaiveDate) -> StockBatch {
        let mut next = self.clone();
        next.is_expired = self.is_expired_on(today);
        next
    }

    /// Eligible for FEFO selection on `today`.
    pub fn is_allocatable(&self, today: NaiveDate) -> bool {
        self.active && !self.is_quarantined && !self.is_expired_on(today) && self.quantity_available > 0
    }

    /// Check the quantity invariant.
    pub fn verify(&self) -> DomainResult<()> {
        if self.quantity_on_hand < 0
            || self.quantity_available < 0
            || self.quantity_reserved < 0
            || self.quantity_quarantined < 0
        {
            return Err(DomainError::invariant(format!(
                "batch {} has a negative quantity bucket (on_hand={}, available={}, reserved={}, quarantined={})",
                self.id,
                self.quantity_on_hand,
                self.quantity_available,
                self.quantity_reserved,
                self.quantity_quarantined
            )));
        }
        if self.quantity_on_hand
            != self.quantity_available + self.quantity_reserved + self.quantity_quarantined
        {
            return Err(DomainError::invariant(format!(
                "batch {} buckets do not sum to on-hand quantity",
                self.id
            )));
        }
        if self.active && self.quantity_on_hand == 0 {
            return Err(DomainError::invariant(format!(
                "batch {} is active with nothing on hand",
                self.id
            )));
        }
        Ok(())
    }

    /// Increase on-hand stock. Quantity lands in the quarantined bucket while
    /// the batch is quarantined.
    pub fn add_quantity(
        &self,
        qty: i64,
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<BatchMutation> {
        ensure_positive(qty)?;
        let mut next = self.clone();
        next.quantity_on_hand += qty;
        if next.is_quarantined {
            next.quantity_quarantined += qty;
        } else {
            next.quantity_available += qty;
        }
        next.active = true;
        next.finish()?;

        let movement = next.movement(MovementDirection::Inbound, kind, qty, reference, at);
        Ok(BatchMutation {
            batch: next,
            movements: vec![movement],
        })
    }

    /// Soft hold on available quantity; not a physical movement.
    pub fn reserve(&self, qty: i64) -> DomainResult<BatchMutation> {
        ensure_positive(qty)?;
        if self.quantity_available < qty {
            return Err(DomainError::insufficient_stock(qty, self.quantity_available));
        }
        let mut next = self.clone();
        next.quantity_available -= qty;
        next.quantity_reserved += qty;
        next.finish()?;
        Ok(BatchMutation::state_only(next))
    }

    pub fn release(&self, qty: i64) -> DomainResult<BatchMutation> {
        ensure_positive(qty)?;
        if self.quantity_reserved < qty {
            return Err(DomainError::invalid_state(format!(
                "cannot release {qty} from batch {}: only {} reserved",
                self.id, self.quantity_reserved
            )));
        }
        let mut next = self.clone();
        next.quantity_reserved -= qty;
        next.quantity_available += qty;
        next.finish()?;
        Ok(BatchMutation::state_only(next))
    }

    /// Turn a reservation into a physical outbound movement.
    pub fn consume(
        &self,
        qty: i64,
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<BatchMutation> {
        ensure_positive(qty)?;
        if self.quantity_reserved < qty {
            return Err(DomainError::invalid_state(format!(
                "cannot consume {qty} from batch {}: only {} reserved",
                self.id, self.quantity_reserved
            )));
        }
        let mut next = self.clone();
        next.quantity_reserved -= qty;
        next.quantity_on_hand -= qty;
        next.finish()?;

        let movement = next.movement(MovementDirection::Outbound, kind, qty, reference, at);
        Ok(BatchMutation {
            batch: next,
            movements: vec![movement],
        })
    }

    /// Move all available quantity into quarantine.
    pub fn quarantine(&self, reason: &str) -> DomainResult<BatchMutation> {
        if self.is_quarantined {
            return Err(DomainError::invalid_state(format!(
                "batch {} is already quarantined",
                self.id
            )));
        }
        if reason.trim().is_empty() {
            return Err(DomainError::validation("quarantine reason is required"));
        }
        let mut next = self.clone();
        next.quantity_quarantined += next.quantity_available;
        next.quantity_available = 0;
        next.is_quarantined = true;
        next.quarantine_reason = Some(reason.trim().to_string());
        next.finish()?;
        Ok(BatchMutation::state_only(next))
    }

    /// Return quarantined quantity to available stock.
    pub fn release_from_quarantine(&self) -> DomainResult<BatchMutation> {
        if !self.is_quarantined {
            return Err(DomainError::invalid_state(format!(
                "batch {} is not quarantined",
                self.id
            )));
        }
        let mut next = self.clone();
        next.quantity_available += next.quantity_quarantined;
        next.quantity_quarantined = 0;
        next.is_quarantined = false;
        next.quarantine_reason = None;
        next.finish()?;
        Ok(BatchMutation::state_only(next))
    }

    /// Signed on-hand correction. Removals draw from available first, then
    /// quarantined; reserved quantity is never touched.
    pub fn adjust(
        &self,
        delta: i64,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<BatchMutation> {
        if delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        if delta > 0 {
            return self.add_quantity(delta, MovementKind::Adjustment, reference, at);
        }

        let removal = -delta;
        let removable = self.quantity_available + self.quantity_quarantined;
        if removable < removal {
            return Err(DomainError::insufficient_stock(removal, removable));
        }
        let mut next = self.clone();
        let from_available = removal.min(next.quantity_available);
        next.quantity_available -= from_available;
        next.quantity_quarantined -= removal - from_available;
        next.quantity_on_hand -= removal;
        next.finish()?;

        let movement = next.movement(
            MovementDirection::Outbound,
            MovementKind::Adjustment,
            removal,
            reference,
            at,
        );
        Ok(BatchMutation {
            batch: next,
            movements: vec![movement],
        })
    }

    /// Deactivate at zero, then check the invariant.
    fn finish(&mut self) -> DomainResult<()> {
        if self.quantity_on_hand == 0 {
            self.active = false;
        }
        self.verify()
    }

    fn movement(
        &self,
        direction: MovementDirection,
        kind: MovementKind,
        quantity: i64,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> StockMovement {
        StockMovement::new(
            self.drug_id,
            self.id,
            self.location_id,
            direction,
            kind,
            quantity,
            self.unit_cost,
            reference,
            at,
        )
    }
}
