use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storefront_core::{AggregateId, Money};

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// Product record as read from the catalog.
///
/// The cart snapshots `name`, `sku`, `price`, `taxable`, `requires_shipping` and
/// `weight` when a line is created, so later catalog edits never reprice a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub status: ProductStatus,
    pub price: Money,
    pub track_inventory: bool,
    pub inventory_quantity: i64,
    pub allow_backorders: bool,
    pub taxable: bool,
    pub requires_shipping: bool,
    /// Weight in kilograms.
    pub weight: Decimal,
}

impl Product {
    /// Active, taxable, shippable, weightless product without inventory tracking.
    pub fn new(id: ProductId, sku: impl Into<String>, name: impl Into<String>, price: Money) -> Self {
        Self {
            id,
            sku: sku.into(),
            name: name.into(),
            status: ProductStatus::Active,
            price,
            track_inventory: false,
            inventory_quantity: 0,
            allow_backorders: false,
            taxable: true,
            requires_shipping: true,
            weight: Decimal::ZERO,
        }
    }

    /// Track inventory with `quantity` units on hand.
    pub fn with_inventory(mut self, quantity: i64) -> Self {
        self.track_inventory = true;
        self.inventory_quantity = quantity;
        self
    }

    pub fn with_backorders(mut self) -> Self {
        self.allow_backorders = true;
        self
    }

    pub fn with_status(mut self, status: ProductStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_weight(mut self, kilograms: Decimal) -> Self {
        self.weight = kilograms;
        self
    }

    pub fn tax_exempt(mut self) -> Self {
        self.taxable = false;
        self
    }

    /// Digital goods: nothing to ship.
    pub fn digital(mut self) -> Self {
        self.requires_shipping = false;
        self
    }

    /// Check if product can be sold (must be Active).
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }

    pub fn has_stock(&self) -> bool {
        self.inventory_quantity > 0
    }

    /// Inventory caps the cart quantity only when tracked without backorders.
    pub fn enforces_inventory(&self) -> bool {
        self.track_inventory && !self.allow_backorders
    }

    /// Units that may sit in a cart, or `None` when stock is not enforced.
    pub fn available_quantity(&self) -> Option<u32> {
        if !self.enforces_inventory() {
            return None;
        }
        Some(u32::try_from(self.inventory_quantity.max(0)).unwrap_or(u32::MAX))
    }
}

/// Product lookup seam (the catalog is an external collaborator).
pub trait ProductCatalog: Send + Sync {
    fn product(&self, id: ProductId) -> Option<Product>;
}

impl<C> ProductCatalog for Arc<C>
where
    C: ProductCatalog + ?Sized,
{
    fn product(&self, id: ProductId) -> Option<Product> {
        (**self).product(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_product() -> Product {
        Product::new(
            ProductId::new(AggregateId::new()),
            "SKU-001",
            "Test Product",
            Money::from_cents(3000),
        )
    }

    #[test]
    fn new_product_is_sellable_and_unbounded() {
        let product = test_product();
        assert!(product.is_active());
        assert!(!product.enforces_inventory());
        assert_eq!(product.available_quantity(), None);
    }

    #[test]
    fn tracked_product_without_backorders_is_bounded() {
        let product = test_product().with_inventory(5);
        assert!(product.enforces_inventory());
        assert_eq!(product.available_quantity(), Some(5));

        let backordered = test_product().with_inventory(5).with_backorders();
        assert_eq!(backordered.available_quantity(), None);
    }

    #[test]
    fn negative_inventory_counts_as_zero_available() {
        let product = test_product().with_inventory(-3);
        assert!(!product.has_stock());
        assert_eq!(product.available_quantity(), Some(0));
    }

    #[test]
    fn archived_product_is_not_active() {
        let product = test_product().with_status(ProductStatus::Archived);
        assert!(!product.is_active());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ProductStatus::Active).unwrap(),
            "\"active\""
        );
    }
}
