//! Shopping carts.
//!
//! `Cart` is an event-sourced aggregate whose totals are recomputed from its line
//! items every time an event is applied. `CartItem` carries the product snapshot
//! taken at add time, so catalog edits never reprice an existing line.

pub mod cart;
pub mod item;
pub mod policy;
pub mod summary;
pub mod totals;

pub use cart::{
    AddItem, ApplyCoupon, AttachLegacyCoupon, Cart, CartAbandoned, CartCleared, CartCommand,
    CartConverted, CartCoupon, CartCreated, CartDiscarded, CartEvent, CartId, CartOwner,
    CartStatus, ClearCart, CouponApplied, CouponRemoved, CreateCart, DiscardCart, ItemAdded,
    ItemQuantityChanged, ItemRemoved, ItemsMerged, LegacyCouponAttached, MarkAbandoned,
    MarkConverted, MergeItems, RemoveCoupon, RemoveItem, UpdateItemQuantity, coupon_applied_message,
};
pub use item::{CartItem, CartItemId, MAX_QUANTITY};
pub use policy::PricingPolicy;
pub use summary::{CartLineSummary, CartSnapshot, CartSummary, FormattedTotals};
pub use totals::CartTotals;
