//! Stock batch ledger: the only writer of batch quantities.
//!
//! Each operation loads the batch, runs a pure mutation from [`crate::batch`],
//! and writes the result with a compare-and-swap on the version it read. A
//! lost race reloads and re-validates against fresh state, up to
//! `max_attempts`. Movements are appended only after the swap succeeds.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use pharmledger_catalog::{DrugId, StockThresholds};
use pharmledger_core::{DomainError, DomainResult, Versioned};

use crate::batch::{BatchId, BatchMutation, IncomingStock, LocationId, StockBatch};
use crate::fefo::{self, Allocation, AllocationLine, AllocationRequest, FulfillmentPolicy};
use crate::movement::{MovementKind, MovementLog, MovementReference, StockMovement};
use crate::stock_level::{self, ExpiryAlert, StockLevel};
use crate::store::{BatchFilter, BatchStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Attempts per batch write before a conflict is surfaced to the caller.
    pub max_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

/// A committed batch write.
#[derive(Debug, Clone)]
struct Applied {
    before: StockBatch,
    after: Versioned<StockBatch>,
    movements: Vec<StockMovement>,
}

/// Result of receiving stock into a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedStock {
    pub batch_id: BatchId,
    /// `false` when an existing lot was topped up.
    pub created: bool,
    pub movement: StockMovement,
}

pub struct StockBatchLedger<S, L> {
    store: S,
    log: L,
    config: LedgerConfig,
}

impl<S, L> StockBatchLedger<S, L>
where
    S: BatchStore,
    L: MovementLog,
{
    pub fn new(store: S, log: L) -> Self {
        Self::with_config(store, log, LedgerConfig::default())
    }

    pub fn with_config(store: S, log: L, config: LedgerConfig) -> Self {
        Self { store, log, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn movements(&self) -> &L {
        &self.log
    }

    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    fn mutate(
        &self,
        batch_id: BatchId,
        op: impl Fn(&StockBatch) -> DomainResult<Option<BatchMutation>>,
    ) -> DomainResult<Option<Applied>> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self.store.load(batch_id)?;
            let Some(mutation) = op(&current.value)? else {
                return Ok(None);
            };
            mutation.batch.verify()?;

            match self.store.compare_and_swap(mutation.batch, current.expected()) {
                Ok(after) => {
                    self.record(&mutation.movements)?;
                    return Ok(Some(Applied {
                        before: current.value,
                        after,
                        movements: mutation.movements,
                    }));
                }
                Err(e) if e.is_retryable() => {
                    warn!(%batch_id, attempt, "batch write lost a version race; retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(DomainError::concurrency(format!(
            "batch {batch_id} still contended after {attempts} attempts"
        )))
    }

    fn mutate_required(
        &self,
        batch_id: BatchId,
        op: impl Fn(&StockBatch) -> DomainResult<BatchMutation>,
    ) -> DomainResult<Applied> {
        self.mutate(batch_id, |b| op(b).map(Some))?
            .ok_or_else(|| DomainError::invariant("batch mutation produced no state"))
    }

    fn record(&self, movements: &[StockMovement]) -> DomainResult<()> {
        if movements.is_empty() {
            return Ok(());
        }
        self.log.append(movements).map_err(|e| {
            error!(error = %e, "batch committed but movement append failed");
            DomainError::invariant(format!("movement append failed after batch write: {e}"))
        })
    }

    fn single_movement(applied: Applied) -> DomainResult<StockMovement> {
        applied
            .movements
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::invariant("expected a stock movement"))
    }

    /// Current batch state with the expired flag refreshed for `today`.
    pub fn batch(&self, batch_id: BatchId, today: NaiveDate) -> DomainResult<Versioned<StockBatch>> {
        Ok(self.store.load(batch_id)?.map(|b| b.check_expired(today)))
    }

    pub fn add_quantity(
        &self,
        batch_id: BatchId,
        qty: i64,
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        let applied = self.mutate_required(batch_id, |b| b.add_quantity(qty, kind, reference, at))?;
        Self::single_movement(applied)
    }

    /// Like [`Self::add_quantity`], with the movement id chosen up front so a
    /// workflow can record it before the stock moves.
    pub fn add_quantity_with_id(
        &self,
        movement_id: Uuid,
        batch_id: BatchId,
        qty: i64,
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        let applied = self.mutate_required(batch_id, |b| {
            b.add_quantity(qty, kind, reference, at)
                .map(|m| m.with_movement_id(movement_id))
        })?;
        Self::single_movement(applied)
    }

    pub fn reserve(&self, batch_id: BatchId, qty: i64) -> DomainResult<Versioned<StockBatch>> {
        Ok(self.mutate_required(batch_id, |b| b.reserve(qty))?.after)
    }

    pub fn release(&self, batch_id: BatchId, qty: i64) -> DomainResult<Versioned<StockBatch>> {
        Ok(self.mutate_required(batch_id, |b| b.release(qty))?.after)
    }

    pub fn consume(
        &self,
        batch_id: BatchId,
        qty: i64,
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        let applied = self.mutate_required(batch_id, |b| b.consume(qty, kind, reference, at))?;
        Self::single_movement(applied)
    }

    pub fn quarantine(&self, batch_id: BatchId, reason: &str) -> DomainResult<Versioned<StockBatch>> {
        Ok(self.mutate_required(batch_id, |b| b.quarantine(reason))?.after)
    }

    pub fn release_from_quarantine(&self, batch_id: BatchId) -> DomainResult<Versioned<StockBatch>> {
        Ok(self.mutate_required(batch_id, |b| b.release_from_quarantine())?.after)
    }

    pub fn adjust(
        &self,
        batch_id: BatchId,
        delta: i64,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        let applied = self.mutate_required(batch_id, |b| b.adjust(delta, reference, at))?;
        Self::single_movement(applied)
    }

    pub fn adjust_with_id(
        &self,
        movement_id: Uuid,
        batch_id: BatchId,
        delta: i64,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        let applied = self.mutate_required(batch_id, |b| {
            b.adjust(delta, reference, at).map(|m| m.with_movement_id(movement_id))
        })?;
        Self::single_movement(applied)
    }

    /// Create a batch for incoming stock, or top up the existing lot with the
    /// same drug, location and batch number. New lots get
    /// [`BatchId::for_lot`], so the batch a delivery lands in is known before
    /// it is posted.
    pub fn receive(
        &self,
        incoming: &IncomingStock,
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<ReceivedStock> {
        let filter = BatchFilter::drug(incoming.drug_id)
            .at(incoming.location_id)
            .numbered(incoming.batch_number.trim());

        for _ in 0..2 {
            if let Some(existing) = self.store.find(&filter).into_iter().next() {
                if existing.value.expiry_date() != incoming.expiry_date {
                    return Err(DomainError::validation(format!(
                        "batch {} is already stocked with expiry {}",
                        existing.value.batch_number(),
                        existing.value.expiry_date()
                    )));
                }
                let movement =
                    self.add_quantity(existing.value.id(), incoming.quantity, kind, reference, at)?;
                return Ok(ReceivedStock {
                    batch_id: existing.value.id(),
                    created: false,
                    movement,
                });
            }

            let lot_id = BatchId::for_lot(incoming.drug_id, incoming.location_id, &incoming.batch_number);
            let created = StockBatch::receive(lot_id, incoming, kind, reference, at)?;
            let batch_id = created.batch.id();
            match self.store.insert(created.batch) {
                Ok(_) => {
                    self.record(&created.movements)?;
                    debug!(%batch_id, batch_number = %incoming.batch_number, "stock batch created");
                    let movement = created
                        .movements
                        .into_iter()
                        .next()
                        .ok_or_else(|| DomainError::invariant("expected a stock movement"))?;
                    return Ok(ReceivedStock {
                        batch_id,
                        created: true,
                        movement,
                    });
                }
                // Another writer created the same lot first; top it up instead.
                Err(DomainError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(DomainError::concurrency(format!(
            "could not settle batch {} for receipt",
            incoming.batch_number
        )))
    }

    /// Whether `receive` would accept this stock right now, and the batch it
    /// would land in. Lets a caller validate a whole delivery and record its
    /// batches before posting any of it.
    pub fn check_incoming(&self, incoming: &IncomingStock) -> DomainResult<BatchId> {
        if incoming.quantity <= 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        if incoming.unit_cost < 0 {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        let filter = BatchFilter::drug(incoming.drug_id)
            .at(incoming.location_id)
            .numbered(incoming.batch_number.trim());
        match self.store.find(&filter).into_iter().next() {
            Some(existing) if existing.value.expiry_date() != incoming.expiry_date => {
                Err(DomainError::validation(format!(
                    "batch {} is already stocked with expiry {}",
                    existing.value.batch_number(),
                    existing.value.expiry_date()
                )))
            }
            Some(existing) => Ok(existing.value.id()),
            None => Ok(BatchId::for_lot(
                incoming.drug_id,
                incoming.location_id,
                &incoming.batch_number,
            )),
        }
    }

    /// FEFO allocation: reserve stock across batches, soonest expiry first.
    pub fn allocate(&self, request: &AllocationRequest, today: NaiveDate) -> DomainResult<Allocation> {
        if request.quantity <= 0 {
            return Err(DomainError::validation("allocation quantity must be positive"));
        }

        let candidates = fefo::fefo_order(
            self.store
                .find(&BatchFilter::drug(request.drug_id).at(request.location_id).active())
                .into_iter()
                .map(|v| v.value),
            today,
        );

        let eligible: i64 = candidates.iter().map(StockBatch::quantity_available).sum();
        if request.policy == FulfillmentPolicy::RequireFull && eligible < request.quantity {
            return Err(DomainError::insufficient_stock(request.quantity, eligible));
        }

        let mut lines: Vec<AllocationLine> = Vec::new();
        let mut remaining = request.quantity;
        for candidate in &candidates {
            if remaining == 0 {
                break;
            }
            let want = remaining;
            let applied = self.mutate(candidate.id(), |b| {
                if !b.is_allocatable(today) {
                    return Ok(None);
                }
                b.reserve(want.min(b.quantity_available())).map(Some)
            });

            match applied {
                Ok(Some(applied)) => {
                    let taken = applied.after.value.quantity_reserved() - applied.before.quantity_reserved();
                    lines.push(fefo::line_for(&applied.after.value, taken));
                    remaining -= taken;
                }
                Ok(None) => {}
                Err(e) => return Err(self.rollback(&lines, e)),
            }
        }

        let allocation = Allocation {
            drug_id: request.drug_id,
            location_id: request.location_id,
            requested: request.quantity,
            lines,
        };

        if request.policy == FulfillmentPolicy::RequireFull && !allocation.is_complete() {
            let shortfall = DomainError::insufficient_stock(allocation.requested, allocation.satisfied());
            return Err(self.rollback(&allocation.lines, shortfall));
        }

        debug!(
            drug_id = %request.drug_id,
            requested = allocation.requested,
            satisfied = allocation.satisfied(),
            batches = allocation.lines.len(),
            "stock allocated"
        );
        Ok(allocation)
    }

    /// Undo a failed allocation and hand back the error that stopped it.
    fn rollback(&self, lines: &[AllocationLine], cause: DomainError) -> DomainError {
        match self.release_allocation(lines) {
            Ok(()) => cause,
            Err(e) => {
                error!(error = %e, %cause, "failed to roll back partial allocation");
                DomainError::invariant(format!(
                    "allocation rollback failed: {e} (allocation failed: {cause})"
                ))
            }
        }
    }

    /// Release every reserved line. Attempts all lines before reporting the
    /// first failure.
    pub fn release_allocation(&self, lines: &[AllocationLine]) -> DomainResult<()> {
        let mut first_error = None;
        for line in lines.iter().filter(|l| l.quantity > 0) {
            if let Err(e) = self.release(line.batch_id, line.quantity) {
                error!(batch_id = %line.batch_id, error = %e, "failed to release reservation");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Consume reserved lines as physical outbound movements.
    pub fn consume_allocation(
        &self,
        lines: &[AllocationLine],
        kind: MovementKind,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<Vec<StockMovement>> {
        let mut movements = Vec::with_capacity(lines.len());
        for line in lines.iter().filter(|l| l.quantity > 0) {
            match self.consume(line.batch_id, line.quantity, kind, reference, at) {
                Ok(m) => movements.push(m),
                Err(e) if movements.is_empty() => return Err(e),
                Err(e) => {
                    error!(batch_id = %line.batch_id, error = %e, "allocation partly consumed");
                    return Err(DomainError::invariant(format!(
                        "allocation partly consumed ({} of {} lines): {e}",
                        movements.len(),
                        lines.len()
                    )));
                }
            }
        }
        Ok(movements)
    }

    /// Consume reserved stock at the source batch as a transfer-out.
    pub fn transfer_out(
        &self,
        batch_id: BatchId,
        qty: i64,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        self.consume(batch_id, qty, MovementKind::TransferOut, reference, at)
    }

    /// Credit a destination lot mirroring `source` (same number, expiry, cost).
    pub fn transfer_in(
        &self,
        source: &StockBatch,
        destination: LocationId,
        qty: i64,
        reference: MovementReference,
        at: DateTime<Utc>,
    ) -> DomainResult<ReceivedStock> {
        let incoming = Self::transfer_incoming(source, destination, qty)?;
        self.receive(&incoming, MovementKind::TransferIn, reference, at)
    }

    /// The destination batch `transfer_in` would credit.
    pub fn check_transfer_in(
        &self,
        source: &StockBatch,
        destination: LocationId,
        qty: i64,
    ) -> DomainResult<BatchId> {
        self.check_incoming(&Self::transfer_incoming(source, destination, qty)?)
    }

    fn transfer_incoming(
        source: &StockBatch,
        destination: LocationId,
        qty: i64,
    ) -> DomainResult<IncomingStock> {
        if destination == source.location_id() {
            return Err(DomainError::validation(
                "transfer destination must differ from the source location",
            ));
        }
        Ok(IncomingStock {
            drug_id: source.drug_id(),
            location_id: destination,
            batch_number: source.batch_number().to_string(),
            expiry_date: source.expiry_date(),
            quantity: qty,
            unit_cost: source.unit_cost(),
            supplier_id: source.supplier_id(),
        })
    }

    /// All batches of a drug (any location), expired flag refreshed.
    pub fn batches_for_drug(&self, drug_id: DrugId, today: NaiveDate) -> Vec<StockBatch> {
        self.store
            .find(&BatchFilter::drug(drug_id))
            .into_iter()
            .map(|v| v.value.check_expired(today))
            .collect()
    }

    /// Derived stock figures for a drug across all locations.
    pub fn stock_level(&self, drug_id: DrugId, thresholds: &StockThresholds, today: NaiveDate) -> StockLevel {
        let batches = self.batches_for_drug(drug_id, today);
        stock_level::stock_level(drug_id, &batches, thresholds, today)
    }

    pub fn expiring_within(&self, today: NaiveDate, days: i64) -> Vec<ExpiryAlert> {
        let batches: Vec<StockBatch> = self
            .store
            .find(&BatchFilter::default().active())
            .into_iter()
            .map(|v| v.value)
            .collect();
        stock_level::expiring_within(&batches, today, days)
    }

    /// Check that the movement history of a batch accounts for its on-hand
    /// quantity.
    pub fn reconcile(&self, batch_id: BatchId) -> DomainResult<()> {
        let batch = self.store.load(batch_id)?;
        let net = self.log.net_quantity_for_batch(batch_id);
        if net != batch.value.quantity_on_hand() {
            return Err(DomainError::invariant(format!(
                "batch {batch_id} on hand {} but movements net {net}",
                batch.value.quantity_on_hand()
            )));
        }
        Ok(())
    }
}
