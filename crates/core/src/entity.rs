//! Entity trait: identity that survives state changes.

/// Entity marker + minimal interface.
///
/// Cart line items are entities: a line keeps its id while its quantity changes,
/// and it keeps it when a guest cart is merged into a user cart.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Two entities are the same when their ids match, whatever their attributes.
    fn same_identity_as(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
