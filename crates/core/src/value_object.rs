//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attributes. In this
/// workspace that covers `Money`, `CurrencyCode`, coupon codes and postal addresses.
/// They are immutable: to "change" one, build a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
