//! Catalog read model.
//!
//! Maintained by applying committed drug events, projection style. Other
//! workflows read drug policy (control flags, thresholds, equivalence) from
//! here instead of replaying drug streams.

use std::collections::HashMap;
use std::sync::RwLock;

use pharmledger_core::{Aggregate, DomainError, DomainResult};

use crate::drug::{Drug, DrugEvent, DrugId};
use crate::reference::{CategoryId, DrugCategory, Supplier, SupplierId};

/// Read access to catalog master data.
pub trait DrugCatalog: Send + Sync {
    fn drug(&self, drug_id: DrugId) -> Option<Drug>;
    fn drug_by_code(&self, code: &str) -> Option<Drug>;
    fn category(&self, category_id: CategoryId) -> Option<DrugCategory>;
    fn supplier(&self, supplier_id: SupplierId) -> Option<Supplier>;

    /// Active drugs therapeutically equivalent to `drug_id`.
    fn equivalents(&self, drug_id: DrugId) -> Vec<Drug>;

    fn require_drug(&self, drug_id: DrugId) -> DomainResult<Drug> {
        self.drug(drug_id).ok_or_else(DomainError::not_found)
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    drugs: HashMap<DrugId, Drug>,
    codes: HashMap<String, DrugId>,
    categories: HashMap<CategoryId, DrugCategory>,
    suppliers: HashMap<SupplierId, Supplier>,
}

/// In-memory catalog for tests/dev and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryDrugCatalog {
    inner: RwLock<CatalogState>,
}

impl InMemoryDrugCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed drug event, in stream order.
    pub fn apply(&self, event: &DrugEvent) -> DomainResult<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;

        let drug_id = event.drug_id();
        let mut drug = state
            .drugs
            .get(&drug_id)
            .cloned()
            .unwrap_or_else(|| Drug::empty(drug_id));
        drug.apply(event);

        if let DrugEvent::DrugRegistered(e) = event {
            state.codes.insert(e.code.to_ascii_uppercase(), drug_id);
        }
        state.drugs.insert(drug_id, drug);
        Ok(())
    }

    /// Whether `code` is already taken by a registered drug.
    pub fn code_in_use(&self, code: &str) -> bool {
        self.inner
            .read()
            .map(|s| s.codes.contains_key(&code.trim().to_ascii_uppercase()))
            .unwrap_or(false)
    }

    pub fn upsert_category(&self, category: DrugCategory) -> DomainResult<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        if let Some(parent) = category.parent_id {
            if !state.categories.contains_key(&parent) {
                return Err(DomainError::validation("parent category does not exist"));
            }
        }
        state.categories.insert(category.id, category);
        Ok(())
    }

    pub fn upsert_supplier(&self, supplier: Supplier) -> DomainResult<()> {
        let mut state = self
            .inner
            .write()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        state.suppliers.insert(supplier.id, supplier);
        Ok(())
    }

    pub fn drugs(&self) -> Vec<Drug> {
        match self.inner.read() {
            Ok(s) => s.drugs.values().cloned().collect(),
            Err(_) => vec![],
        }
    }
}

impl DrugCatalog for InMemoryDrugCatalog {
    fn drug(&self, drug_id: DrugId) -> Option<Drug> {
        let state = self.inner.read().ok()?;
        state.drugs.get(&drug_id).filter(|d| d.is_registered()).cloned()
    }

    fn drug_by_code(&self, code: &str) -> Option<Drug> {
        let state = self.inner.read().ok()?;
        let id = state.codes.get(&code.trim().to_ascii_uppercase())?;
        state.drugs.get(id).cloned()
    }

    fn category(&self, category_id: CategoryId) -> Option<DrugCategory> {
        let state = self.inner.read().ok()?;
        state.categories.get(&category_id).cloned()
    }

    fn supplier(&self, supplier_id: SupplierId) -> Option<Supplier> {
        let state = self.inner.read().ok()?;
        state.suppliers.get(&supplier_id).cloned()
    }

    fn equivalents(&self, drug_id: DrugId) -> Vec<Drug> {
        let state = match self.inner.read() {
            Ok(s) => s,
            Err(_) => return vec![],
        };
        let Some(original) = state.drugs.get(&drug_id) else {
            return vec![];
        };
        let mut found: Vec<Drug> = state
            .drugs
            .values()
            .filter(|d| d.is_active() && original.is_equivalent_to(d))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.code().cmp(b.code()));
        found
    }
}

impl<C> DrugCatalog for std::sync::Arc<C>
where
    C: DrugCatalog + ?Sized,
{
    fn drug(&self, drug_id: DrugId) -> Option<Drug> {
        (**self).drug(drug_id)
    }

    fn drug_by_code(&self, code: &str) -> Option<Drug> {
        (**self).drug_by_code(code)
    }

    fn category(&self, category_id: CategoryId) -> Option<DrugCategory> {
        (**self).category(category_id)
    }

    fn supplier(&self, supplier_id: SupplierId) -> Option<Supplier> {
        (**self).supplier(supplier_id)
    }

    fn equivalents(&self, drug_id: DrugId) -> Vec<Drug> {
        (**self).equivalents(drug_id)
    }
}
