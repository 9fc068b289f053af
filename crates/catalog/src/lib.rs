//! Drug catalog: master data for drugs, categories and suppliers.
//!
//! Read-mostly reference data the stock and workflow modules depend on,
//! implemented as deterministic domain logic (no IO, no storage).

pub mod catalog;
pub mod drug;
pub mod reference;
pub mod thresholds;

pub use catalog::{DrugCatalog, InMemoryDrugCatalog};
pub use drug::{
    ChangeFormularyStatus, ControlFlags, DiscontinueDrug, Drug, DrugCommand, DrugDiscontinued,
    DrugEvent, DrugId, DrugRegistered, FormularyStatus, FormularyStatusChanged, RegisterDrug,
    StockThresholdsUpdated, UpdateStockThresholds,
};
pub use reference::{CategoryId, DrugCategory, Supplier, SupplierId};
pub use thresholds::{StockStatus, StockThresholds};
