//! `pharmledger-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the pharmacy
//! modules (no infrastructure concerns).

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;
pub mod versioned;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, UserId};
pub use value_object::ValueObject;
pub use versioned::Versioned;
