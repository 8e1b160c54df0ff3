use storefront_carts::{CartSnapshot, CartTotals, PricingPolicy};
use storefront_catalog::ShippingMethod;
use storefront_core::Money;

/// Checkout totals share the cart's shape; only the shipping input differs.
pub type CheckoutTotals = CartTotals;

/// Totals for a checkout built from `cart`.
///
/// Until a method is chosen this is the cart's own tiered estimate. Afterwards
/// shipping is the method's `cost(weight, subtotal)` (zero when nothing ships),
/// and tax and discount are recomputed around it.
pub fn checkout_totals(
    cart: &CartSnapshot,
    method: Option<&ShippingMethod>,
    policy: &PricingPolicy,
) -> CheckoutTotals {
    let estimate = CartTotals::estimate(&cart.items, cart.coupon.as_ref(), policy);
    let Some(method) = method else {
        return estimate;
    };

    let shipping = if cart.ships_physically() {
        method.cost(cart.total_weight(), estimate.subtotal)
    } else {
        Money::ZERO
    };

    CartTotals::with_shipping(&cart.items, cart.coupon.as_ref(), policy, shipping)
}
