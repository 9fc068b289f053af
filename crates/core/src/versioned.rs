//! Explicit `(value, version)` pair for compare-and-swap storage.

use serde::{Deserialize, Serialize};

use crate::aggregate::ExpectedVersion;
use crate::error::DomainResult;

/// A stored value together with its optimistic-concurrency stamp.
///
/// The version starts at 1 when the record is first stored and increases by
/// exactly one on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn initial(value: T) -> Self {
        Self { value, version: 1 }
    }

    /// The expectation a writer must present to replace this state.
    pub fn expected(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.version)
    }

    /// Replace the value if `expected` matches, bumping the version.
    pub fn swap(&mut self, value: T, expected: ExpectedVersion) -> DomainResult<u64> {
        expected.check(self.version)?;
        self.value = value;
        self.version += 1;
        Ok(self.version)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainError;

    #[test]
    fn swap_increments_version() {
        let mut v = Versioned::initial(10);
        let expected = v.expected();
        assert_eq!(v.swap(4, expected).unwrap(), 2);
        assert_eq!(v.value, 4);
    }

    #[test]
    fn stale_swap_is_rejected_and_leaves_value_untouched() {
        let mut v = Versioned::initial(10);
        let stale = v.expected();
        v.swap(9, stale).unwrap();

        let err = v.swap(1, stale).unwrap_err();
        assert!(matches!(err, DomainError::ConcurrencyConflict(_)));
        assert_eq!(v.value, 9);
        assert_eq!(v.version, 2);
    }
}
