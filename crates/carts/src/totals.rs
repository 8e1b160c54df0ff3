use serde::{Deserialize, Serialize};

use storefront_core::Money;
use storefront_coupons::legacy_discount;

use crate::cart::CartCoupon;
use crate::item::CartItem;
use crate::policy::PricingPolicy;

/// Computed money totals of a cart (or of a checkout built from one).
///
/// Always derived, never set by hand:
/// `total == subtotal + tax_amount + shipping_amount - discount_amount`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Money,
    pub tax_amount: Money,
    pub shipping_amount: Money,
    pub discount_amount: Money,
    pub total: Money,
}

impl CartTotals {
    /// Totals with the cart's tiered shipping estimate.
    pub fn estimate(
        items: &[CartItem],
        coupon: Option<&CartCoupon>,
        policy: &PricingPolicy,
    ) -> Self {
        let subtotal = subtotal(items);
        let shipping = policy.shipping_estimate(subtotal, ships_physically(items));
        Self::with_shipping(items, coupon, policy, shipping)
    }

    /// Totals with an already-decided shipping amount.
    ///
    /// Checkout uses this with the chosen method's cost; `FREESHIP` then discounts
    /// exactly that amount.
    pub fn with_shipping(
        items: &[CartItem],
        coupon: Option<&CartCoupon>,
        policy: &PricingPolicy,
        shipping_amount: Money,
    ) -> Self {
        let subtotal = subtotal(items);
        let taxable: Money = items
            .iter()
            .filter(|item| item.taxable)
            .map(|item| item.unit_price.times(item.quantity))
            .sum();
        let tax_amount = policy.tax(taxable);

        let discount_amount = match coupon {
            Some(CartCoupon::Applied(applied)) => applied.discount_for(subtotal),
            Some(CartCoupon::Legacy { code }) if policy.legacy_coupon_codes => {
                legacy_discount(code, subtotal, shipping_amount)
            }
            Some(CartCoupon::Legacy { .. }) | None => Money::ZERO,
        };

        let total = (subtotal + tax_amount + shipping_amount - discount_amount).non_negative();

        Self {
            subtotal,
            tax_amount,
            shipping_amount,
            discount_amount,
            total,
        }
    }

    /// Whether `total` matches its components exactly.
    pub fn is_consistent(&self) -> bool {
        self.total == self.subtotal + self.tax_amount + self.shipping_amount - self.discount_amount
    }
}

fn subtotal(items: &[CartItem]) -> Money {
    items
        .iter()
        .map(|item| item.unit_price.times(item.quantity))
        .sum::<Money>()
        .round()
}

pub(crate) fn ships_physically(items: &[CartItem]) -> bool {
    items.iter().any(|item| item.requires_shipping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::CartItemId;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use storefront_catalog::{Product, ProductId};
    use storefront_core::AggregateId;
    use storefront_coupons::{AppliedCoupon, CouponCode, CouponId, CouponTerms};

    fn item(price_cents: i64, quantity: u32) -> CartItem {
        let product = Product::new(
            ProductId::new(AggregateId::new()),
            "SKU",
            "Item",
            Money::from_cents(price_cents),
        );
        CartItem::from_product(
            CartItemId::new(AggregateId::new()),
            &product,
            quantity,
            BTreeMap::new(),
        )
    }

    fn legacy(code: &str) -> CartCoupon {
        CartCoupon::Legacy {
            code: code.to_string(),
        }
    }

    #[test]
    fn thirty_dollars_times_two() {
        let totals = CartTotals::estimate(&[item(3000, 2)], None, &PricingPolicy::default());

        assert_eq!(totals.subtotal, Money::from_major(60));
        assert_eq!(totals.tax_amount, Money::from_cents(480));
        assert_eq!(totals.shipping_amount, Money::from_major(5));
        assert_eq!(totals.discount_amount, Money::ZERO);
        assert_eq!(totals.total, Money::from_cents(6980));
        assert!(totals.is_consistent());
    }

    #[test]
    fn empty_cart_is_all_zero() {
        let totals = CartTotals::estimate(&[], None, &PricingPolicy::default());
        assert_eq!(totals, CartTotals::default());
    }

    #[test]
    fn only_taxable_lines_are_taxed() {
        let mut exempt = item(5000, 1);
        exempt.taxable = false;
        let totals =
            CartTotals::estimate(&[item(2500, 1), exempt], None, &PricingPolicy::default());
        assert_eq!(totals.tax_amount, Money::from_cents(200));
    }

    #[test]
    fn digital_only_cart_ships_free() {
        let mut ebook = item(1000, 1);
        ebook.requires_shipping = false;
        let totals = CartTotals::estimate(&[ebook], None, &PricingPolicy::default());
        assert_eq!(totals.shipping_amount, Money::ZERO);
    }

    #[test]
    fn legacy_save10_binds_cap_above_500() {
        let policy = PricingPolicy::default();

        let totals = CartTotals::estimate(&[item(20000, 1)], Some(&legacy("SAVE10")), &policy);
        assert_eq!(totals.discount_amount, Money::from_major(20));

        let totals = CartTotals::estimate(&[item(60000, 1)], Some(&legacy("SAVE10")), &policy);
        assert_eq!(totals.discount_amount, Money::from_major(50));
        assert!(totals.is_consistent());
    }

    #[test]
    fn legacy_freeship_cancels_shipping() {
        let totals =
            CartTotals::estimate(&[item(2000, 1)], Some(&legacy("freeship")), &PricingPolicy::default());
        assert_eq!(totals.shipping_amount, Money::from_major(10));
        assert_eq!(totals.discount_amount, Money::from_major(10));
        assert_eq!(totals.total, Money::from_cents(2160));
    }

    #[test]
    fn legacy_codes_can_be_disabled() {
        let policy = PricingPolicy {
            legacy_coupon_codes: false,
            ..PricingPolicy::default()
        };
        let totals = CartTotals::estimate(&[item(20000, 1)], Some(&legacy("SAVE10")), &policy);
        assert_eq!(totals.discount_amount, Money::ZERO);
    }

    #[test]
    fn applied_coupon_below_minimum_discounts_nothing() {
        let applied = CartCoupon::Applied(AppliedCoupon {
            coupon_id: CouponId::new(AggregateId::new()),
            terms: CouponTerms::percentage(CouponCode::parse("BIG").unwrap(), Decimal::from(10))
                .with_min_order(Money::from_major(50)),
        });
        let policy = PricingPolicy::default();

        let totals = CartTotals::estimate(&[item(4999, 1)], Some(&applied), &policy);
        assert_eq!(totals.discount_amount, Money::ZERO);

        let totals = CartTotals::estimate(&[item(5000, 1)], Some(&applied), &policy);
        assert_eq!(totals.discount_amount, Money::from_major(5));
    }

    #[test]
    fn explicit_shipping_overrides_estimate() {
        let totals = CartTotals::with_shipping(
            &[item(3000, 2)],
            None,
            &PricingPolicy::default(),
            Money::from_cents(874),
        );
        assert_eq!(totals.shipping_amount, Money::from_cents(874));
        assert_eq!(totals.total, Money::from_cents(7354));
    }
}
