//! Hardcoded codes from before coupons were stored as records.
//!
//! Carts imported with a bare `coupon_code` and no coupon record are priced with
//! this table. Unknown codes discount nothing.

use rust_decimal::Decimal;

use storefront_core::Money;

use crate::code::normalize_code;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyCode {
    /// 10% off, capped at $50.
    Save10,
    /// 20% off, capped at $100.
    Save20,
    /// Discount equal to the shipping amount.
    FreeShip,
}

impl LegacyCode {
    pub fn lookup(raw: &str) -> Option<Self> {
        match normalize_code(raw).as_str() {
            "SAVE10" => Some(Self::Save10),
            "SAVE20" => Some(Self::Save20),
            "FREESHIP" => Some(Self::FreeShip),
            _ => None,
        }
    }

    pub fn discount(self, subtotal: Money, shipping: Money) -> Money {
        let subtotal = subtotal.non_negative();
        let discount = match self {
            Self::Save10 => subtotal.scale(Decimal::new(10, 2)).min(Money::from_major(50)),
            Self::Save20 => subtotal.scale(Decimal::new(20, 2)).min(Money::from_major(100)),
            Self::FreeShip => shipping.non_negative(),
        };
        discount.round()
    }
}

/// Discount for a bare legacy `code`; zero for anything outside the table.
pub fn legacy_discount(code: &str, subtotal: Money, shipping: Money) -> Money {
    LegacyCode::lookup(code)
        .map(|legacy| legacy.discount(subtotal, shipping))
        .unwrap_or(Money::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save10_caps_at_fifty() {
        assert_eq!(
            legacy_discount("SAVE10", Money::from_major(200), Money::ZERO),
            Money::from_major(20)
        );
        assert_eq!(
            legacy_discount("SAVE10", Money::from_major(600), Money::ZERO),
            Money::from_major(50)
        );
    }

    #[test]
    fn save20_caps_at_one_hundred() {
        assert_eq!(
            legacy_discount("save20", Money::from_major(300), Money::ZERO),
            Money::from_major(60)
        );
        assert_eq!(
            legacy_discount("SAVE20", Money::from_major(900), Money::ZERO),
            Money::from_major(100)
        );
    }

    #[test]
    fn freeship_matches_shipping() {
        assert_eq!(
            legacy_discount("FREESHIP", Money::from_major(40), Money::from_major(10)),
            Money::from_major(10)
        );
    }

    #[test]
    fn unknown_code_is_zero() {
        assert_eq!(
            legacy_discount("BOGUS", Money::from_major(500), Money::from_major(10)),
            Money::ZERO
        );
    }
}
