//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Used for reference data (categories, suppliers) that has identity but no
/// workflow of its own.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
