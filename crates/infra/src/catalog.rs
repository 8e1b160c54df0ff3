//! In-memory catalog for tests and development.

use std::collections::HashMap;
use std::sync::RwLock;

use storefront_catalog::{
    Product, ProductCatalog, ProductId, ShippingMethod, ShippingMethodId, ShippingMethods,
};

/// Products and shipping methods held in memory.
///
/// Implements both collaborator seams, so one instance can back a whole
/// [`crate::storefront::Storefront`].
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
    shipping_methods: RwLock<HashMap<ShippingMethodId, ShippingMethod>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_product(&self, product: Product) {
        if let Ok(mut products) = self.products.write() {
            products.insert(product.id, product);
        }
    }

    pub fn remove_product(&self, id: ProductId) -> Option<Product> {
        self.products.write().ok()?.remove(&id)
    }

    pub fn upsert_shipping_method(&self, method: ShippingMethod) {
        if let Ok(mut methods) = self.shipping_methods.write() {
            methods.insert(method.id.clone(), method);
        }
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn product(&self, id: ProductId) -> Option<Product> {
        self.products.read().ok()?.get(&id).cloned()
    }
}

impl ShippingMethods for InMemoryCatalog {
    fn shipping_method(&self, id: &ShippingMethodId) -> Option<ShippingMethod> {
        self.shipping_methods.read().ok()?.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::{AggregateId, Money};

    #[test]
    fn products_are_replaced_and_removed() {
        let catalog = InMemoryCatalog::new();
        let id = ProductId::new(AggregateId::new());
        catalog.upsert_product(Product::new(id, "MUG", "Mug", Money::from_major(8)));
        catalog.upsert_product(Product::new(id, "MUG", "Mug", Money::from_major(9)));

        assert_eq!(catalog.product(id).unwrap().price, Money::from_major(9));
        assert!(catalog.remove_product(id).is_some());
        assert!(catalog.product(id).is_none());
    }

    #[test]
    fn shipping_methods_resolve_by_id() {
        let catalog = InMemoryCatalog::new();
        catalog.upsert_shipping_method(ShippingMethod {
            id: ShippingMethodId::new("ground"),
            name: "Ground".to_string(),
            active: true,
            base_cost: Money::from_major(5),
            cost_per_kg: Money::ZERO,
            free_shipping_threshold: None,
        });

        assert!(catalog.shipping_method(&ShippingMethodId::new(" ground ")).is_some());
        assert!(catalog.shipping_method(&ShippingMethodId::new("air")).is_none());
    }
}
