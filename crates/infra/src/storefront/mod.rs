//! Application services the web layer calls.
//!
//! `Storefront` looks up collaborator data (products, shipping methods, coupon
//! records, the time), puts it into commands and runs them through the
//! [`CommandDispatcher`]. Aggregates stay free of IO.

mod carts;
mod checkout;
mod coupons;
mod sweep;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use storefront_carts::{Cart, CartId, CartOwner};
use storefront_catalog::{ProductCatalog, ShippingMethods};
use storefront_checkout::{Checkout, CheckoutId, Order, OrderId};
use storefront_core::{AggregateId, SessionId, UserId};
use storefront_coupons::{Coupon, CouponCode, CouponId};
use storefront_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};

use crate::catalog::InMemoryCatalog;
use crate::clock::Clock;
use crate::command_dispatcher::{CommandDispatcher, DispatchError, Loaded};
use crate::config::StoreConfig;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::read_model::{InMemoryIndex, LookupIndex};

pub use carts::CouponApplication;
pub use sweep::SweepReport;

pub const CART_AGGREGATE: &str = "carts.cart";
pub const CHECKOUT_AGGREGATE: &str = "checkout.checkout";
pub const ORDER_AGGREGATE: &str = "checkout.order";
pub const COUPON_AGGREGATE: &str = "coupons.coupon";

pub type JsonEventBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// The storefront wired to in-memory store and bus.
pub type InMemoryStorefront = Storefront<Arc<InMemoryEventStore>, Arc<JsonEventBus>>;

/// Who is asking: the session is always known, the user only once signed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shopper {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
}

impl Shopper {
    pub fn guest(session_id: SessionId) -> Self {
        Self {
            session_id,
            user_id: None,
        }
    }

    pub fn signed_in(user_id: UserId, session_id: SessionId) -> Self {
        Self {
            session_id,
            user_id: Some(user_id),
        }
    }

    /// The owner whose cart this shopper uses.
    pub fn owner(&self) -> CartOwner {
        match self.user_id {
            Some(user_id) => CartOwner::User(user_id),
            None => CartOwner::Guest(self.session_id.clone()),
        }
    }
}

pub struct Storefront<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    config: StoreConfig,
    products: Arc<dyn ProductCatalog>,
    shipping: Arc<dyn ShippingMethods>,
    clock: Arc<dyn Clock>,
    /// The live cart of each owner.
    carts_by_owner: Arc<dyn LookupIndex<CartOwner, CartId>>,
    /// The open checkout session of each cart.
    checkouts_by_cart: Arc<dyn LookupIndex<CartId, CheckoutId>>,
    /// Unique coupon codes.
    coupons_by_code: Arc<dyn LookupIndex<CouponCode, CouponId>>,
}

impl InMemoryStorefront {
    pub fn in_memory(
        config: StoreConfig,
        catalog: Arc<InMemoryCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Storefront::new(
            config,
            Arc::new(InMemoryEventStore::new()),
            Arc::new(JsonEventBus::new()),
            catalog.clone(),
            catalog,
            clock,
        )
    }
}

impl<S, B> Storefront<S, B> {
    pub fn new(
        config: StoreConfig,
        store: S,
        bus: B,
        products: Arc<dyn ProductCatalog>,
        shipping: Arc<dyn ShippingMethods>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher =
            CommandDispatcher::new(store, bus).with_max_retries(config.max_conflict_retries);

        Self {
            dispatcher,
            config,
            products,
            shipping,
            clock,
            carts_by_owner: Arc::new(InMemoryIndex::new()),
            checkouts_by_cart: Arc::new(InMemoryIndex::new()),
            coupons_by_code: Arc::new(InMemoryIndex::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }
}

impl<S, B> Storefront<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Committed events, for order sinks (mailers, webhooks, analytics).
    pub fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.dispatcher.bus().subscribe()
    }

    pub fn cart(&self, cart_id: CartId) -> Result<Cart, DispatchError> {
        Ok(self.load_cart(cart_id)?.aggregate)
    }

    pub fn checkout(&self, checkout_id: CheckoutId) -> Result<Checkout, DispatchError> {
        Ok(self.load_checkout(checkout_id)?.aggregate)
    }

    pub fn order(&self, order_id: OrderId) -> Result<Order, DispatchError> {
        Ok(self.load_order(order_id)?.aggregate)
    }

    pub fn coupon(&self, coupon_id: CouponId) -> Result<Coupon, DispatchError> {
        Ok(self.load_coupon(coupon_id)?.aggregate)
    }

    fn make_cart(&self) -> impl Fn(AggregateId) -> Cart {
        let policy = self.config.pricing.clone();
        move |id| Cart::with_policy(CartId::new(id), policy.clone())
    }

    fn make_checkout(&self) -> impl Fn(AggregateId) -> Checkout {
        let policy = self.config.pricing.clone();
        move |id| Checkout::with_policy(CheckoutId::new(id), policy.clone())
    }

    fn load_cart(&self, cart_id: CartId) -> Result<Loaded<Cart>, DispatchError> {
        let loaded = self.dispatcher.load(cart_id.0, self.make_cart())?;
        if !loaded.aggregate.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(loaded)
    }

    fn load_checkout(&self, checkout_id: CheckoutId) -> Result<Loaded<Checkout>, DispatchError> {
        let loaded = self.dispatcher.load(checkout_id.0, self.make_checkout())?;
        if !loaded.aggregate.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(loaded)
    }

    fn load_order(&self, order_id: OrderId) -> Result<Loaded<Order>, DispatchError> {
        let loaded = self
            .dispatcher
            .load(order_id.0, |id| Order::empty(OrderId::new(id)))?;
        if !loaded.aggregate.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(loaded)
    }

    fn load_coupon(&self, coupon_id: CouponId) -> Result<Loaded<Coupon>, DispatchError> {
        let loaded = self
            .dispatcher
            .load(coupon_id.0, |id| Coupon::empty(CouponId::new(id)))?;
        if !loaded.aggregate.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(loaded)
    }
}
