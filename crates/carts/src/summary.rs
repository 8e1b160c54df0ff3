use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storefront_catalog::ProductId;
use storefront_core::{CurrencyCode, Money};

use crate::cart::{Cart, CartCoupon, CartId, CartOwner, CartStatus};
use crate::item::{CartItem, CartItemId};
use crate::totals::CartTotals;

/// Display strings for a set of totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedTotals {
    pub subtotal: String,
    pub tax_amount: String,
    pub shipping_amount: String,
    pub discount_amount: String,
    pub total: String,
}

impl FormattedTotals {
    pub fn new(totals: &CartTotals, currency: &CurrencyCode) -> Self {
        Self {
            subtotal: currency.format(totals.subtotal),
            tax_amount: currency.format(totals.tax_amount),
            shipping_amount: currency.format(totals.shipping_amount),
            discount_amount: currency.format(totals.discount_amount),
            total: currency.format(totals.total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineSummary {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub product_name: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    pub formatted_unit_price: String,
    pub formatted_total_price: String,
}

impl CartLineSummary {
    pub fn new(item: &CartItem, currency: &CurrencyCode) -> Self {
        let total_price = item.total_price();
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            sku: item.sku.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price,
            formatted_unit_price: currency.format(item.unit_price),
            formatted_total_price: currency.format(total_price),
        }
    }
}

/// What the web layer renders for a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub cart_id: CartId,
    pub status: CartStatus,
    pub currency: CurrencyCode,
    pub item_count: u32,
    pub unique_item_count: usize,
    pub subtotal: Money,
    pub tax_amount: Money,
    pub shipping_amount: Money,
    pub discount_amount: Money,
    pub total: Money,
    pub formatted: FormattedTotals,
    pub coupon_code: Option<String>,
    pub items: Vec<CartLineSummary>,
}

impl CartSummary {
    pub fn from_cart(cart: &Cart) -> Self {
        let totals = cart.totals();
        let currency = cart.currency();

        Self {
            cart_id: cart.id_typed(),
            status: cart.status(),
            currency: currency.clone(),
            item_count: cart.item_count(),
            unique_item_count: cart.unique_item_count(),
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            shipping_amount: totals.shipping_amount,
            discount_amount: totals.discount_amount,
            total: totals.total,
            formatted: FormattedTotals::new(totals, currency),
            coupon_code: cart.coupon_code().map(str::to_string),
            items: cart
                .items()
                .iter()
                .map(|item| CartLineSummary::new(item, currency))
                .collect(),
        }
    }
}

impl From<&Cart> for CartSummary {
    fn from(cart: &Cart) -> Self {
        Self::from_cart(cart)
    }
}

/// Frozen copy of a cart that a checkout prices from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub cart_id: CartId,
    pub owner: CartOwner,
    pub currency: CurrencyCode,
    pub items: Vec<CartItem>,
    pub coupon: Option<CartCoupon>,
    pub totals: CartTotals,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total weight in kilograms.
    pub fn total_weight(&self) -> Decimal {
        self.items.iter().map(CartItem::total_weight).sum()
    }

    pub fn ships_physically(&self) -> bool {
        crate::totals::ships_physically(&self.items)
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon.as_ref().map(CartCoupon::code)
    }
}

impl Cart {
    /// Snapshot for checkout, or `None` before the cart exists.
    pub fn snapshot(&self) -> Option<CartSnapshot> {
        let owner = self.owner()?.clone();
        Some(CartSnapshot {
            cart_id: self.id_typed(),
            owner,
            currency: self.currency().clone(),
            items: self.items().to_vec(),
            coupon: self.coupon().cloned(),
            totals: *self.totals(),
        })
    }

    pub fn summary(&self) -> CartSummary {
        CartSummary::from_cart(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{AddItem, CartCommand, CreateCart};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;
    use storefront_catalog::Product;
    use storefront_core::{Aggregate, AggregateId, UserId};

    fn cart_with(price_cents: i64, quantity: i64, weight: Decimal) -> Cart {
        let cart_id = CartId::new(AggregateId::new());
        let mut cart = Cart::empty(cart_id);
        cart.execute(&CartCommand::CreateCart(CreateCart {
            cart_id,
            owner: CartOwner::User(UserId::new()),
            currency: CurrencyCode::usd(),
            expires_at: Utc::now() + Duration::days(30),
            occurred_at: Utc::now(),
        }))
        .unwrap();

        let product = Product::new(
            ProductId::new(AggregateId::new()),
            "TEE-M",
            "T-Shirt",
            Money::from_cents(price_cents),
        )
        .with_weight(weight);
        cart.execute(&CartCommand::AddItem(AddItem {
            cart_id,
            item_id: CartItemId::new(AggregateId::new()),
            product,
            quantity,
            options: BTreeMap::from([("size".to_string(), "M".to_string())]),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        cart
    }

    #[test]
    fn summary_exposes_counts_and_formatted_totals() {
        let summary = cart_with(3000, 2, Decimal::ZERO).summary();

        assert_eq!(summary.item_count, 2);
        assert_eq!(summary.unique_item_count, 1);
        assert_eq!(summary.formatted.subtotal, "$60.00");
        assert_eq!(summary.formatted.tax_amount, "$4.80");
        assert_eq!(summary.formatted.shipping_amount, "$5.00");
        assert_eq!(summary.formatted.discount_amount, "$0.00");
        assert_eq!(summary.formatted.total, "$69.80");

        let line = &summary.items[0];
        assert_eq!(line.product_name, "T-Shirt");
        assert_eq!(line.formatted_unit_price, "$30.00");
        assert_eq!(line.formatted_total_price, "$60.00");
    }

    #[test]
    fn summary_serializes_for_the_web_layer() {
        let json = serde_json::to_value(cart_with(1000, 1, Decimal::ZERO).summary()).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["formatted"]["total"], "$20.80");
        assert!(json["coupon_code"].is_null());
    }

    #[test]
    fn snapshot_sums_weight() {
        let snapshot = cart_with(1000, 3, Decimal::new(15, 1)).snapshot().unwrap();
        assert_eq!(snapshot.total_weight(), Decimal::new(45, 1));
        assert!(snapshot.ships_physically());
        assert_eq!(snapshot.items[0].options["size"], "M");
    }

    #[test]
    fn snapshot_requires_created_cart() {
        assert!(Cart::empty(CartId::new(AggregateId::new())).snapshot().is_none());
    }
}
