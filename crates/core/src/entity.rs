//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Storage adapters key their tables by `Entity::Id`, so every persisted
/// domain record implements this.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
