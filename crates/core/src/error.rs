//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Every variant is recoverable by the
/// calling workflow (retry or user prompt) except `InvariantViolation`, which
/// signals a bookkeeping defect: the enclosing unit of work must be abandoned
/// without writing anything.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A duplicate or otherwise conflicting record.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,

    /// Requested quantity cannot be met from eligible stock.
    #[error("insufficient stock: requested {requested}, satisfied {satisfied}, short by {shortfall}")]
    InsufficientStock {
        requested: i64,
        satisfied: i64,
        shortfall: i64,
    },

    /// Transition attempted from a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Hand-over attempted before mandatory counseling was completed.
    #[error("patient counseling must be completed before dispensing")]
    CounselingRequired,

    /// Version-stamp mismatch on write; the caller must retry on fresh state.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// Operation requires a prior approval.
    #[error("approval required: {0}")]
    ApprovalRequired(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    pub fn approval_required(msg: impl Into<String>) -> Self {
        Self::ApprovalRequired(msg.into())
    }

    /// Shortfall error for a request that could only be partly satisfied.
    pub fn insufficient_stock(requested: i64, satisfied: i64) -> Self {
        Self::InsufficientStock {
            requested,
            satisfied,
            shortfall: (requested - satisfied).max(0),
        }
    }

    /// Whether re-running the operation against fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_carries_shortfall() {
        let err = DomainError::insufficient_stock(50, 25);
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                requested: 50,
                satisfied: 25,
                shortfall: 25
            }
        );
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("short by 25"));
    }
}
