//! Coupons: code normalization, the Coupon aggregate, and the evaluator that
//! decides eligibility and discount amounts for a cart subtotal.

pub mod code;
pub mod coupon;
pub mod evaluator;
pub mod legacy;

pub use code::{CouponCode, normalize_code};
pub use coupon::{
    AppliedCoupon, Coupon, CouponCommand, CouponCreated, CouponDeactivated, CouponEvent, CouponId,
    CouponRedeemed, CouponSnapshot, CouponTerms, CreateCoupon, DeactivateCoupon, DiscountType,
    RedeemCoupon,
};
pub use evaluator::{Ineligibility, calculate_discount, check_eligibility, is_valid_for_cart};
pub use legacy::{LegacyCode, legacy_discount};
