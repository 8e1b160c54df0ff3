use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storefront_catalog::{Product, ProductId};
use storefront_core::{AggregateId, DomainError, Entity, Money, RejectionReason};

/// Upper bound on any single line's quantity.
pub const MAX_QUANTITY: u32 = 999;

/// Cart line identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartItemId(pub AggregateId);

impl CartItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CartItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A priced cart line.
///
/// Everything except `quantity` is a snapshot of the product at the moment the
/// line was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub product_name: String,
    pub sku: String,
    pub unit_price: Money,
    pub quantity: u32,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub taxable: bool,
    pub requires_shipping: bool,
    /// Weight of one unit in kilograms.
    pub weight: Decimal,
}

impl CartItem {
    pub fn from_product(
        id: CartItemId,
        product: &Product,
        quantity: u32,
        options: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            product_id: product.id,
            product_name: product.name.clone(),
            sku: product.sku.clone(),
            unit_price: product.price,
            quantity,
            options,
            taxable: product.taxable,
            requires_shipping: product.requires_shipping,
            weight: product.weight,
        }
    }

    /// `round(unit_price * quantity, 2)`.
    pub fn total_price(&self) -> Money {
        self.unit_price.times(self.quantity).round()
    }

    pub fn total_weight(&self) -> Decimal {
        self.weight * Decimal::from(self.quantity)
    }

    /// Whether the product can still be bought at all.
    pub fn is_available(product: &Product) -> bool {
        product.is_active()
            && (!product.track_inventory || product.has_stock() || product.allow_backorders)
    }

    /// How many more units this line can take.
    pub fn max_quantity_addable(&self, product: &Product) -> u32 {
        max_addable(product, self.quantity)
    }

    /// Re-run the line rules against the current product record.
    pub fn validate(&self, product: &Product) -> Result<(), DomainError> {
        validate_quantity(product, self.quantity, self.quantity)
    }
}

impl Entity for CartItem {
    type Id = CartItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Units of `product` that still fit next to `current` units already in the cart.
pub(crate) fn max_addable(product: &Product, current: u32) -> u32 {
    match product.available_quantity() {
        Some(available) => available.saturating_sub(current),
        None => MAX_QUANTITY.saturating_sub(current),
    }
}

/// Line rules: product active, `quantity` in `1..=999`, and within stock when the
/// product enforces inventory. `current` is the line's quantity before the change
/// and only feeds the `max_addable` hint on rejection.
pub(crate) fn validate_quantity(
    product: &Product,
    quantity: u32,
    current: u32,
) -> Result<(), DomainError> {
    if !product.is_active() {
        return Err(DomainError::rejected(
            RejectionReason::ProductUnavailable,
            "product not available",
        ));
    }

    if quantity == 0 || quantity > MAX_QUANTITY {
        return Err(DomainError::validation(
            "quantity",
            format!("must be between 1 and {MAX_QUANTITY}"),
        ));
    }

    if let Some(available) = product.available_quantity() {
        if quantity > available {
            return Err(DomainError::rejected(
                RejectionReason::InsufficientInventory {
                    max_addable: available.saturating_sub(current),
                },
                "exceeds available inventory",
            ));
        }
    }

    Ok(())
}
