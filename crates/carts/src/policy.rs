use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storefront_core::Money;

/// Store-wide pricing constants.
///
/// Defaults: 8% tax on taxable lines, shipping estimate free from $100, $5 from
/// $50, $10 below that, and legacy coupon codes honoured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Money,
    pub reduced_shipping_threshold: Money,
    pub reduced_shipping_rate: Money,
    pub standard_shipping_rate: Money,
    pub legacy_coupon_codes: bool,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::new(8, 2),
            free_shipping_threshold: Money::from_major(100),
            reduced_shipping_threshold: Money::from_major(50),
            reduced_shipping_rate: Money::from_major(5),
            standard_shipping_rate: Money::from_major(10),
            legacy_coupon_codes: true,
        }
    }
}

impl PricingPolicy {
    /// `round(taxable_amount * tax_rate, 2)`.
    pub fn tax(&self, taxable_amount: Money) -> Money {
        taxable_amount.scale(self.tax_rate).round()
    }

    /// Tiered shipping estimate shown on the cart before a method is chosen.
    ///
    /// Checkout replaces this with the chosen method's own cost; the two are not
    /// meant to agree.
    pub fn shipping_estimate(&self, subtotal: Money, ships_physically: bool) -> Money {
        if !ships_physically {
            return Money::ZERO;
        }
        if subtotal >= self.free_shipping_threshold {
            Money::ZERO
        } else if subtotal >= self.reduced_shipping_threshold {
            self.reduced_shipping_rate
        } else {
            self.standard_shipping_rate
        }
    }
}
