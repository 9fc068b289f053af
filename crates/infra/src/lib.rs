//! Infrastructure layer: event store, command dispatch, configuration and
//! the `PharmacyEngine` application service that ties the workflows to the
//! stock ledger.

pub mod command_dispatcher;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_store;
pub mod notices;

pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
pub use config::{DispensingConfig, EngineConfig, InventoryConfig, PrescriptionConfig};
pub use engine::{InMemoryPharmacyEngine, PharmacyEngine, SubstitutionRequest};
pub use error::{EngineError, EngineResult};
pub use notices::{WorkflowNotice, notices_for};

mod integration_tests;
