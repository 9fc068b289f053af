//! Derived stock figures. Nothing here is stored; every value is computed
//! from batch state on read.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pharmledger_catalog::{DrugId, StockStatus, StockThresholds};

use crate::batch::{BatchId, LocationId, StockBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub drug_id: DrugId,
    /// Sum of on-hand quantity over active batches.
    pub current_stock: i64,
    pub available: i64,
    pub reserved: i64,
    pub quarantined: i64,
    /// On-hand quantity sitting in expired batches.
    pub expired: i64,
    /// Classification of the usable stock (not expired, not quarantined).
    pub status: StockStatus,
    pub suggested_order: i64,
}

impl StockLevel {
    pub fn usable(&self) -> i64 {
        self.available + self.reserved
    }
}

/// Aggregate batch buckets for one drug.
pub fn stock_level<'a>(
    drug_id: DrugId,
    batches: impl IntoIterator<Item = &'a StockBatch>,
    thresholds: &StockThresholds,
    today: NaiveDate,
) -> StockLevel {
    let mut level = StockLevel {
        drug_id,
        current_stock: 0,
        available: 0,
        reserved: 0,
        quarantined: 0,
        expired: 0,
        status: StockStatus::OutOfStock,
        suggested_order: 0,
    };

    for batch in batches
        .into_iter()
        .filter(|b| b.drug_id() == drug_id && b.is_active())
    {
        level.current_stock += batch.quantity_on_hand();
        level.quarantined += batch.quantity_quarantined();
        if batch.is_expired_on(today) {
            level.expired += batch.quantity_available() + batch.quantity_reserved();
        } else {
            level.available += batch.quantity_available();
            level.reserved += batch.quantity_reserved();
        }
    }

    level.status = thresholds.classify(level.usable());
    level.suggested_order = thresholds.suggested_order(level.usable());
    level
}

/// A batch nearing (or past) its expiry date with stock still on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryAlert {
    pub batch_id: BatchId,
    pub drug_id: DrugId,
    pub location_id: LocationId,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    /// Negative once expired.
    pub days_until_expiry: i64,
    pub quantity_on_hand: i64,
}

/// Active batches expiring within `days` of `today`, soonest first.
pub fn expiring_within<'a>(
    batches: impl IntoIterator<Item = &'a StockBatch>,
    today: NaiveDate,
    days: i64,
) -> Vec<ExpiryAlert> {
    let mut alerts: Vec<ExpiryAlert> = batches
        .into_iter()
        .filter(|b| b.is_active() && b.days_until_expiry(today) <= days)
        .map(|b| ExpiryAlert {
            batch_id: b.id(),
            drug_id: b.drug_id(),
            location_id: b.location_id(),
            batch_number: b.batch_number().to_string(),
            expiry_date: b.expiry_date(),
            days_until_expiry: b.days_until_expiry(today),
            quantity_on_hand: b.quantity_on_hand(),
        })
        .collect();
    alerts.sort_by(|a, b| {
        a.days_until_expiry
            .cmp(&b.days_until_expiry)
            .then_with(|| a.batch_number.cmp(&b.batch_number))
    });
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{incoming, test_reference, test_time};
    use crate::movement::{MovementKind, ReferenceKind};
    use chrono::Duration;

    fn receive(drug: DrugId, number: &str, expires_in: i64, qty: i64) -> StockBatch {
        StockBatch::receive(
            BatchId::generate(),
            &incoming(drug, LocationId::generate(), number, expires_in, qty),
            MovementKind::Receipt,
            test_reference(ReferenceKind::Receipt),
            test_time(),
        )
        .unwrap()
        .batch
    }

    #[test]
    fn level_splits_expired_and_quarantined_stock() {
        let drug = DrugId::generate();
        let today = test_time().date_naive();
        let fresh = receive(drug, "F", 100, 30).reserve(10).unwrap().batch;
        let held = receive(drug, "Q", 100, 5).quarantine("damp carton").unwrap().batch;
        let stale = receive(drug, "E", 3, 8);

        let thresholds = StockThresholds::new(10, 100, 20).unwrap();
        let level = stock_level(drug, [&fresh, &held, &stale], &thresholds, today + Duration::days(10));

        assert_eq!(level.current_stock, 43);
        assert_eq!(level.available, 20);
        assert_eq!(level.reserved, 10);
        assert_eq!(level.quarantined, 5);
        assert_eq!(level.expired, 8);
        assert_eq!(level.status, StockStatus::ReorderPoint);
        assert_eq!(level.suggested_order, 70);
    }

    #[test]
    fn expiring_within_window_sorted_soonest_first() {
        let drug = DrugId::generate();
        let today = test_time().date_naive();
        let soon = receive(drug, "SOON", 5, 1);
        let later = receive(drug, "LATER", 20, 1);
        let far = receive(drug, "FAR", 365, 1);

        let alerts = expiring_within([&far, &later, &soon], today, 30);
        let numbers: Vec<&str> = alerts.iter().map(|a| a.batch_number.as_str()).collect();
        assert_eq!(numbers, vec!["SOON", "LATER"]);
        assert_eq!(alerts[0].days_until_expiry, 5);
    }
}
