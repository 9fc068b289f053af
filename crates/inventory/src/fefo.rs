//! First-expiry-first-out batch selection.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pharmledger_catalog::DrugId;
use pharmledger_core::ValueObject;

use crate::batch::{BatchId, LocationId, StockBatch};

/// What to do when the eligible stock cannot cover the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentPolicy {
    /// Fail with `InsufficientStock` and reserve nothing.
    #[default]
    RequireFull,
    /// Reserve what exists and report the shortfall.
    AllowPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub drug_id: DrugId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub policy: FulfillmentPolicy,
}

/// Quantity reserved on one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub unit_cost: i64,
}

impl ValueObject for AllocationLine {}

impl AllocationLine {
    pub fn line_cost(&self) -> i64 {
        self.quantity * self.unit_cost
    }
}

/// Outcome of a FEFO allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub drug_id: DrugId,
    pub location_id: LocationId,
    pub requested: i64,
    pub lines: Vec<AllocationLine>,
}

impl Allocation {
    pub fn satisfied(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn shortfall(&self) -> i64 {
        (self.requested - self.satisfied()).max(0)
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall() == 0
    }

    pub fn total_cost(&self) -> i64 {
        self.lines.iter().map(AllocationLine::line_cost).sum()
    }
}

/// FEFO ordering key: soonest expiry, then oldest receipt, then batch number.
fn fefo_key(batch: &StockBatch, today: NaiveDate) -> (i64, chrono::DateTime<chrono::Utc>, String) {
    (
        batch.days_until_expiry(today),
        batch.received_at(),
        batch.batch_number().to_string(),
    )
}

/// Filter to allocatable batches and sort them in FEFO order.
pub fn fefo_order(batches: impl IntoIterator<Item = StockBatch>, today: NaiveDate) -> Vec<StockBatch> {
    let mut eligible: Vec<StockBatch> = batches
        .into_iter()
        .map(|b| b.check_expired(today))
        .filter(|b| b.is_allocatable(today))
        .collect();
    eligible.sort_by_cached_key(|b| fefo_key(b, today));
    eligible
}

pub(crate) fn line_for(batch: &StockBatch, quantity: i64) -> AllocationLine {
    AllocationLine {
        batch_id: batch.id(),
        batch_number: batch.batch_number().to_string(),
        expiry_date: batch.expiry_date(),
        quantity,
        unit_cost: batch.unit_cost(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{incoming, test_reference, test_time};
    use crate::batch::IncomingStock;
    use crate::movement::{MovementKind, ReferenceKind};
    use chrono::Duration;

    fn batch_from(incoming: &IncomingStock, received_offset_days: i64) -> StockBatch {
        StockBatch::receive(
            BatchId::generate(),
            incoming,
            MovementKind::Receipt,
            test_reference(ReferenceKind::Receipt),
            test_time() - Duration::days(received_offset_days),
        )
        .unwrap()
        .batch
    }

    #[test]
    fn soonest_expiry_sorts_first() {
        let drug = DrugId::generate();
        let loc = LocationId::generate();
        let later = batch_from(&incoming(drug, loc, "B", 90, 20), 0);
        let sooner = batch_from(&incoming(drug, loc, "A", 30, 5), 0);

        let ordered = fefo_order(vec![later, sooner], test_time().date_naive());

        let numbers: Vec<&str> = ordered.iter().map(StockBatch::batch_number).collect();
        assert_eq!(numbers, ["A", "B"]);
    }

    #[test]
    fn ties_break_on_receipt_date_then_batch_number() {
        let drug = DrugId::generate();
        let loc = LocationId::generate();
        let newer = batch_from(&incoming(drug, loc, "A", 60, 5), 1);
        let older = batch_from(&incoming(drug, loc, "Z", 60, 5), 10);

        let ordered = fefo_order(vec![newer, older], test_time().date_naive());
        assert_eq!(ordered[0].batch_number(), "Z");
    }

    #[test]
    fn expired_and_quarantined_batches_are_excluded() {
        let drug = DrugId::generate();
        let loc = LocationId::generate();
        let expired = batch_from(&incoming(drug, loc, "OLD", -1, 50), 200);
        let held = batch_from(&incoming(drug, loc, "HELD", 40, 50), 0)
            .quarantine("visual defect")
            .unwrap()
            .batch;
        let good = batch_from(&incoming(drug, loc, "GOOD", 400, 50), 0);

        let ordered = fefo_order(vec![expired, held, good], test_time().date_naive());
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].batch_number(), "GOOD");
    }

    #[test]
    fn allocation_reports_shortfall() {
        let allocation = Allocation {
            drug_id: DrugId::generate(),
            location_id: LocationId::generate(),
            requested: 50,
            lines: vec![AllocationLine {
                batch_id: BatchId::generate(),
                batch_number: "A".into(),
                expiry_date: test_time().date_naive(),
                quantity: 25,
                unit_cost: 200,
            }],
        };
        assert_eq!(allocation.satisfied(), 25);
        assert_eq!(allocation.shortfall(), 25);
        assert!(!allocation.is_complete());
        assert_eq!(allocation.total_cost(), 5_000);
    }
}
