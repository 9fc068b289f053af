use thiserror::Error;

use pharmledger_core::DomainError;

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStoreError;

/// Error surfaced by [`crate::engine::PharmacyEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Business rule failure, including stale versions
    /// (`DomainError::ConcurrencyConflict`).
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// Events were committed but could not be published.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<DispatchError> for EngineError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Domain(e) => EngineError::Domain(e),
            DispatchError::Deserialize(msg) => EngineError::Deserialize(msg),
            DispatchError::Store(e) => EngineError::Store(e),
            DispatchError::Publish(msg) => EngineError::Publish(msg),
        }
    }
}

impl EngineError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            EngineError::Domain(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        self.domain().is_some_and(DomainError::is_retryable)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
