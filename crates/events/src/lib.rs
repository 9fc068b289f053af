//! `pharmledger-events` — event, command and publication mechanics.
//!
//! Workflow aggregates emit typed events; infrastructure wraps them in
//! envelopes, stores them append-only and publishes them so label printing,
//! counseling material and other collaborators can react.

pub mod bus;
pub mod command;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use command::Command;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
