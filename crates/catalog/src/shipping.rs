use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storefront_core::Money;

/// Shipping method identifier, as submitted by the checkout form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShippingMethodId(String);

impl ShippingMethodId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Display for ShippingMethodId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A carrier option with a weight-based cost function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub id: ShippingMethodId,
    pub name: String,
    pub active: bool,
    pub base_cost: Money,
    pub cost_per_kg: Money,
    /// Orders at or above this subtotal ship free with this method.
    pub free_shipping_threshold: Option<Money>,
}

impl ShippingMethod {
    /// Committed shipping cost: `base_cost + cost_per_kg * weight`, waived entirely
    /// once `subtotal` reaches the free-shipping threshold.
    ///
    /// This is the checkout-side cost; carts only show a tiered estimate before a
    /// method has been chosen.
    pub fn cost(&self, weight_kg: Decimal, subtotal: Money) -> Money {
        if let Some(threshold) = self.free_shipping_threshold {
            if subtotal >= threshold {
                return Money::ZERO;
            }
        }

        (self.base_cost + self.cost_per_kg.scale(weight_kg)).round()
    }
}

/// Shipping method lookup seam.
pub trait ShippingMethods: Send + Sync {
    fn shipping_method(&self, id: &ShippingMethodId) -> Option<ShippingMethod>;
}

impl<S> ShippingMethods for Arc<S>
where
    S: ShippingMethods + ?Sized,
{
    fn shipping_method(&self, id: &ShippingMethodId) -> Option<ShippingMethod> {
        (**self).shipping_method(id)
    }
}
