//! Versioned batch storage with compare-and-swap writes.

use std::collections::HashMap;
use std::sync::RwLock;

use pharmledger_catalog::DrugId;
use pharmledger_core::{DomainError, DomainResult, ExpectedVersion, Versioned};

use crate::batch::{BatchId, LocationId, StockBatch};

/// Batch lookup criteria. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFilter {
    pub drug_id: Option<DrugId>,
    pub location_id: Option<LocationId>,
    pub batch_number: Option<String>,
    pub active_only: bool,
}

impl BatchFilter {
    pub fn drug(drug_id: DrugId) -> Self {
        Self {
            drug_id: Some(drug_id),
            ..Self::default()
        }
    }

    pub fn at(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn numbered(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn matches(&self, batch: &StockBatch) -> bool {
        self.drug_id.is_none_or(|d| batch.drug_id() == d)
            && self.location_id.is_none_or(|l| batch.location_id() == l)
            && self
                .batch_number
                .as_deref()
                .is_none_or(|n| batch.batch_number() == n)
            && (!self.active_only || batch.is_active())
    }
}

/// Batch persistence abstraction.
///
/// Every write is conditional on the version the writer read; a stale write
/// fails with `ConcurrencyConflict` and leaves the stored state untouched.
pub trait BatchStore: Send + Sync {
    /// Store a new batch at version 1.
    ///
    /// Fails with `Conflict` if the id exists, or if another batch already
    /// holds the same drug, location and batch number.
    fn insert(&self, batch: StockBatch) -> DomainResult<Versioned<StockBatch>>;

    fn load(&self, batch_id: BatchId) -> DomainResult<Versioned<StockBatch>>;

    fn compare_and_swap(
        &self,
        batch: StockBatch,
        expected: ExpectedVersion,
    ) -> DomainResult<Versioned<StockBatch>>;

    /// Matching batches, ordered by id.
    fn find(&self, filter: &BatchFilter) -> Vec<Versioned<StockBatch>>;
}

/// In-memory batch store (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    batches: RwLock<HashMap<BatchId, Versioned<StockBatch>>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for InMemoryBatchStore {
    fn insert(&self, batch: StockBatch) -> DomainResult<Versioned<StockBatch>> {
        let mut batches = self
            .batches
            .write()
            .map_err(|_| DomainError::invariant("batch store lock poisoned"))?;

        if batches.contains_key(&batch.id()) {
            return Err(DomainError::conflict(format!("batch {} already exists", batch.id())));
        }
        let same_lot = batches.values().any(|v| {
            v.value.drug_id() == batch.drug_id()
                && v.value.location_id() == batch.location_id()
                && v.value.batch_number() == batch.batch_number()
        });
        if same_lot {
            return Err(DomainError::conflict(format!(
                "batch number {} already stocked at this location",
                batch.batch_number()
            )));
        }

        let stored = Versioned::initial(batch);
        batches.insert(stored.value.id(), stored.clone());
        Ok(stored)
    }

    fn load(&self, batch_id: BatchId) -> DomainResult<Versioned<StockBatch>> {
        let batches = self
            .batches
            .read()
            .map_err(|_| DomainError::invariant("batch store lock poisoned"))?;
        batches.get(&batch_id).cloned().ok_or_else(DomainError::not_found)
    }

    fn compare_and_swap(
        &self,
        batch: StockBatch,
        expected: ExpectedVersion,
    ) -> DomainResult<Versioned<StockBatch>> {
        let mut batches = self
            .batches
            .write()
            .map_err(|_| DomainError::invariant("batch store lock poisoned"))?;
        let current = batches.get_mut(&batch.id()).ok_or_else(DomainError::not_found)?;
        current.swap(batch, expected)?;
        Ok(current.clone())
    }

    fn find(&self, filter: &BatchFilter) -> Vec<Versioned<StockBatch>> {
        let batches = match self.batches.read() {
            Ok(b) => b,
            Err(_) => return vec![],
        };
        let mut found: Vec<Versioned<StockBatch>> = batches
            .values()
            .filter(|v| filter.matches(&v.value))
            .cloned()
            .collect();
        found.sort_by_key(|v| v.value.id());
        found
    }
}

impl<S> BatchStore for std::sync::Arc<S>
where
    S: BatchStore + ?Sized,
{
    fn insert(&self, batch: StockBatch) -> DomainResult<Versioned<StockBatch>> {
        (**self).insert(batch)
    }

    fn load(&self, batch_id: BatchId) -> DomainResult<Versioned<StockBatch>> {
        (**self).load(batch_id)
    }

    fn compare_and_swap(
        &self,
        batch: StockBatch,
        expected: ExpectedVersion,
    ) -> DomainResult<Versioned<StockBatch>> {
        (**self).compare_and_swap(batch, expected)
    }

    fn find(&self, filter: &BatchFilter) -> Vec<Versioned<StockBatch>> {
        (**self).find(filter)
    }
}
