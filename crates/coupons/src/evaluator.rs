//! Coupon eligibility and discount computation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use storefront_core::{CurrencyCode, DomainError, Money, RejectionReason};

use crate::coupon::{CouponSnapshot, CouponTerms, DiscountType};

/// Why a coupon cannot be used right now. Checked in declaration order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Ineligibility {
    #[error("This coupon is no longer active")]
    Inactive,
    #[error("This coupon has expired")]
    Expired,
    #[error("This coupon is not yet valid")]
    NotStarted,
    #[error("This coupon has reached its usage limit")]
    UsageExceeded,
    #[error("Minimum order amount of {minimum} required")]
    BelowMinimum { minimum: Money },
}

impl Ineligibility {
    pub fn reason(&self) -> RejectionReason {
        match self {
            Self::Inactive => RejectionReason::CouponInactive,
            Self::Expired => RejectionReason::CouponExpired,
            Self::NotStarted => RejectionReason::CouponNotStarted,
            Self::UsageExceeded => RejectionReason::CouponUsageExceeded,
            Self::BelowMinimum { .. } => RejectionReason::CouponBelowMinimum,
        }
    }

    /// Rejection carrying the reason code and the message for `currency`.
    pub fn into_error(self, currency: &CurrencyCode) -> DomainError {
        DomainError::rejected(self.reason(), self.message(currency))
    }

    /// User-facing message with amounts rendered in `currency`.
    pub fn message(&self, currency: &CurrencyCode) -> String {
        match self {
            Self::BelowMinimum { minimum } => {
                format!("Minimum order amount of {} required", currency.format(*minimum))
            }
            other => other.to_string(),
        }
    }
}

/// Check every usability rule for `coupon` against a cart `subtotal` at `now`.
pub fn check_eligibility(
    coupon: &CouponSnapshot,
    subtotal: Money,
    now: DateTime<Utc>,
) -> Result<(), Ineligibility> {
    let terms = &coupon.terms;

    if !coupon.active {
        return Err(Ineligibility::Inactive);
    }
    if terms.valid_until.is_some_and(|until| until < now) {
        return Err(Ineligibility::Expired);
    }
    if terms.valid_from.is_some_and(|from| from > now) {
        return Err(Ineligibility::NotStarted);
    }
    if coupon.is_exhausted() {
        return Err(Ineligibility::UsageExceeded);
    }
    if let Some(minimum) = terms.min_order_amount {
        if subtotal < minimum {
            return Err(Ineligibility::BelowMinimum { minimum });
        }
    }

    Ok(())
}

pub fn is_valid_for_cart(coupon: &CouponSnapshot, subtotal: Money, now: DateTime<Utc>) -> bool {
    check_eligibility(coupon, subtotal, now).is_ok()
}

/// Discount for `subtotal`, rounded to cents.
///
/// Percentage coupons take `value / 100` of the subtotal and respect the cap; fixed
/// coupons never discount more than the subtotal.
pub fn calculate_discount(terms: &CouponTerms, subtotal: Money) -> Money {
    let subtotal = subtotal.non_negative();

    let discount = match terms.discount_type {
        DiscountType::Percentage => {
            let raw = subtotal.scale(terms.discount_value / Decimal::ONE_HUNDRED);
            match terms.max_discount_amount {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }
        DiscountType::Fixed => Money::new(terms.discount_value).min(subtotal),
    };

    discount.round()
}
