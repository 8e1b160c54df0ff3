//! Checkout sessions and the orders they place.
//!
//! A [`Checkout`] walks `started → shipping_info → payment_info → review →
//! completed` over a frozen cart snapshot. Completing it yields the data for an
//! [`Order`]; the infrastructure layer commits the order, the cart conversion and
//! the checkout completion together.

pub mod address;
pub mod checkout;
pub mod order;
pub mod pricing;
pub mod summary;

pub use address::Address;
pub use checkout::{
    CancelCheckout, CancelReason, Checkout, CheckoutCancelled, CheckoutCommand, CheckoutCompleted,
    CheckoutEvent, CheckoutId, CheckoutStarted, CheckoutStatus, CompleteCheckout,
    PaymentInfoSubmitted, ShippingInfoSubmitted, ShippingStepEntered, StartCheckout,
    SubmitPaymentInfo, SubmitShippingInfo,
};
pub use order::{
    Order, OrderCommand, OrderEvent, OrderId, OrderLine, OrderPlaced, OrderStatus, PlaceOrder,
    order_number,
};
pub use pricing::{CheckoutTotals, checkout_totals};
pub use summary::CheckoutSummary;
