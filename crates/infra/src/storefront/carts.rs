use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use storefront_carts::{
    AddItem, ApplyCoupon, AttachLegacyCoupon, Cart, CartCommand, CartId, CartItemId, CartOwner,
    CartSummary, ClearCart, CreateCart, DiscardCart, MarkAbandoned, MergeItems, RemoveCoupon,
    RemoveItem, UpdateItemQuantity, coupon_applied_message,
};
use storefront_catalog::ProductId;
use storefront_core::{Aggregate, AggregateId, DomainError, RejectionReason};
use storefront_coupons::CouponCode;
use storefront_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::DispatchError;
use crate::event_store::{EventStore, StreamAppend};
use crate::read_model::IndexError;

use super::{CART_AGGREGATE, Shopper, Storefront};

/// Outcome of a successful coupon application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponApplication {
    pub cart: CartSummary,
    /// "Coupon applied! You saved $20.00"
    pub message: String,
}

fn invalid_coupon() -> DispatchError {
    DomainError::rejected(RejectionReason::CouponNotFound, "Invalid coupon code").into()
}

impl<S, B> Storefront<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// The cart this request works with.
    ///
    /// Guests get their session's cart. A signed-in shopper gets their own cart,
    /// with any cart the same session built as a guest folded into it. Carts are
    /// created on first access and replaced once expired.
    #[instrument(skip(self, shopper), fields(owner = %shopper.owner()), err)]
    pub fn resolve_cart(&self, shopper: &Shopper) -> Result<Cart, DispatchError> {
        let now = self.clock.now();

        let Some(user_id) = shopper.user_id else {
            let owner = CartOwner::Guest(shopper.session_id.clone());
            return self.active_cart(owner, self.config.guest_cart_ttl(), now);
        };

        let cart = self.active_cart(
            CartOwner::User(user_id),
            self.config.user_cart_ttl(),
            now,
        )?;

        let guest_owner = CartOwner::Guest(shopper.session_id.clone());
        match self.current_cart(&guest_owner, now)? {
            Some(guest) if guest.id_typed() != cart.id_typed() => {
                let merged = self.merge_guest_cart(cart.id_typed(), guest.id_typed(), now)?;
                self.release_owner(&guest_owner, guest.id_typed());
                Ok(merged)
            }
            _ => Ok(cart),
        }
    }

    #[instrument(skip(self, options), fields(cart_id = %cart_id), err)]
    pub fn add_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i64,
        options: BTreeMap<String, String>,
    ) -> Result<Cart, DispatchError> {
        let product = self.products.product(product_id).ok_or(DispatchError::NotFound)?;

        let command = CartCommand::AddItem(AddItem {
            cart_id,
            item_id: CartItemId::new(AggregateId::new()),
            product,
            quantity,
            options,
            occurred_at: self.clock.now(),
        });

        self.dispatch_cart(cart_id, &command)
    }

    /// Set a line's quantity; zero or less removes the line.
    #[instrument(skip(self), fields(cart_id = %cart_id), err)]
    pub fn update_item_quantity(
        &self,
        cart_id: CartId,
        item_id: CartItemId,
        quantity: i64,
    ) -> Result<Cart, DispatchError> {
        let cart = self.load_cart(cart_id)?.aggregate;
        let item = cart.item(item_id).ok_or(DispatchError::NotFound)?;

        let product = if quantity > 0 {
            Some(
                self.products
                    .product(item.product_id)
                    .ok_or(DispatchError::NotFound)?,
            )
        } else {
            None
        };

        let command = CartCommand::UpdateItemQuantity(UpdateItemQuantity {
            cart_id,
            item_id,
            quantity,
            product,
            occurred_at: self.clock.now(),
        });

        self.dispatch_cart(cart_id, &command)
    }

    pub fn remove_item(&self, cart_id: CartId, item_id: CartItemId) -> Result<Cart, DispatchError> {
        let command = CartCommand::RemoveItem(RemoveItem {
            cart_id,
            item_id,
            occurred_at: self.clock.now(),
        });

        self.dispatch_cart(cart_id, &command)
    }

    pub fn clear_cart(&self, cart_id: CartId) -> Result<Cart, DispatchError> {
        let command = CartCommand::ClearCart(ClearCart {
            cart_id,
            occurred_at: self.clock.now(),
        });

        self.dispatch_cart(cart_id, &command)
    }

    /// Look the code up and attach the coupon if the cart qualifies.
    #[instrument(skip(self), fields(cart_id = %cart_id), err)]
    pub fn apply_coupon(
        &self,
        cart_id: CartId,
        code: &str,
    ) -> Result<CouponApplication, DispatchError> {
        let code = CouponCode::parse(code)?;
        let coupon = self.find_coupon(&code)?.ok_or_else(invalid_coupon)?;

        let command = CartCommand::ApplyCoupon(ApplyCoupon {
            cart_id,
            coupon,
            occurred_at: self.clock.now(),
        });
        let cart = self.dispatch_cart(cart_id, &command)?;

        let discount = cart.totals().discount_amount;
        info!(code = %code.as_str(), discount = %discount, "coupon applied");

        Ok(CouponApplication {
            message: coupon_applied_message(cart.currency(), discount),
            cart: cart.summary(),
        })
    }

    pub fn remove_coupon(&self, cart_id: CartId) -> Result<Cart, DispatchError> {
        let command = CartCommand::RemoveCoupon(RemoveCoupon {
            cart_id,
            occurred_at: self.clock.now(),
        });

        self.dispatch_cart(cart_id, &command)
    }

    /// Carry a bare pre-coupon-table code over onto a cart (data imports).
    pub fn attach_legacy_coupon(&self, cart_id: CartId, code: &str) -> Result<Cart, DispatchError> {
        if !self.config.pricing.legacy_coupon_codes {
            return Err(invalid_coupon());
        }

        let command = CartCommand::AttachLegacyCoupon(AttachLegacyCoupon {
            cart_id,
            code: code.to_string(),
            occurred_at: self.clock.now(),
        });

        self.dispatch_cart(cart_id, &command)
    }

    pub fn cart_summary(&self, cart_id: CartId) -> Result<CartSummary, DispatchError> {
        Ok(self.load_cart(cart_id)?.aggregate.summary())
    }

    pub(super) fn dispatch_cart(
        &self,
        cart_id: CartId,
        command: &CartCommand,
    ) -> Result<Cart, DispatchError> {
        match self
            .dispatcher
            .dispatch(cart_id.0, CART_AGGREGATE, command, self.make_cart())
        {
            Ok(dispatched) => Ok(dispatched.aggregate),
            Err(err) => {
                warn!(cart_id = %cart_id, error = %err, "cart command rejected");
                Err(err)
            }
        }
    }

    /// The owner's live cart, if any. Expired carts are abandoned on the way.
    fn current_cart(
        &self,
        owner: &CartOwner,
        now: DateTime<Utc>,
    ) -> Result<Option<Cart>, DispatchError> {
        let Some(cart_id) = self.carts_by_owner.get(owner) else {
            return Ok(None);
        };

        // The index only ever points at carts whose stream exists.
        let cart = match self.load_cart(cart_id) {
            Ok(loaded) => loaded.aggregate,
            Err(DispatchError::NotFound) => {
                self.release_owner(owner, cart_id);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if !cart.is_active() {
            self.release_owner(owner, cart_id);
            return Ok(None);
        }

        if cart.is_expired(now) {
            let command = CartCommand::MarkAbandoned(MarkAbandoned {
                cart_id,
                occurred_at: now,
            });
            self.dispatch_cart(cart_id, &command)?;
            self.release_owner(owner, cart_id);
            info!(cart_id = %cart_id, owner = %owner, "expired cart abandoned");
            return Ok(None);
        }

        Ok(Some(cart))
    }

    /// The owner's live cart, created if there is none.
    ///
    /// The cart stream is written before the owner slot is claimed. When two
    /// first visits race, the loser discards its fresh cart and returns the
    /// winner's.
    fn active_cart(
        &self,
        owner: CartOwner,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Cart, DispatchError> {
        if let Some(cart) = self.current_cart(&owner, now)? {
            return Ok(cart);
        }

        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            DispatchError::InvariantViolation(format!("cart lifetime {ttl} overflows"))
        })?;

        let cart_id = CartId::new(AggregateId::new());
        let command = CartCommand::CreateCart(CreateCart {
            cart_id,
            owner: owner.clone(),
            currency: self.config.currency.clone(),
            expires_at,
            occurred_at: now,
        });
        let cart = self.dispatch_cart(cart_id, &command)?;

        let winner = match self.carts_by_owner.insert_unique(owner.clone(), cart_id) {
            Ok(()) => {
                info!(cart_id = %cart_id, owner = %owner, "cart created");
                return Ok(cart);
            }
            Err(IndexError::Taken) => self.carts_by_owner.get(&owner),
            Err(err @ IndexError::Poisoned) => return Err(DispatchError::Conflict(err.to_string())),
        };

        let Some(winner) = winner else {
            return Err(DispatchError::Concurrency(format!("cart for {owner} was replaced")));
        };

        let discard = CartCommand::DiscardCart(DiscardCart {
            cart_id,
            merged_into: winner,
            occurred_at: now,
        });
        self.dispatch_cart(cart_id, &discard)?;
        debug!(cart_id = %cart_id, winner = %winner, owner = %owner, "lost cart creation race");

        self.current_cart(&owner, now)?
            .ok_or_else(|| DispatchError::Concurrency(format!("cart for {owner} was replaced")))
    }

    /// Drop the owner entry, unless another request already replaced it.
    fn release_owner(&self, owner: &CartOwner, cart_id: CartId) {
        if self.carts_by_owner.get(owner) == Some(cart_id) {
            self.carts_by_owner.remove(owner);
        }
    }

    /// Fold `source` into `target` and discard `source`, in one transaction.
    ///
    /// Quantities of shared products are summed without re-checking inventory.
    fn merge_guest_cart(
        &self,
        target: CartId,
        source: CartId,
        now: DateTime<Utc>,
    ) -> Result<Cart, DispatchError> {
        let merged = self.dispatcher.with_retry("merge_guest_cart", || {
            let mut into = self.load_cart(target)?;
            let from = self.load_cart(source)?;

            let merge_events = into.aggregate.handle(&CartCommand::MergeItems(MergeItems {
                cart_id: target,
                source_cart_id: source,
                items: from.aggregate.items().to_vec(),
                occurred_at: now,
            }))?;
            let discard_events = from.aggregate.handle(&CartCommand::DiscardCart(DiscardCart {
                cart_id: source,
                merged_into: target,
                occurred_at: now,
            }))?;

            self.dispatcher.commit(vec![
                StreamAppend::from_typed(target.0, CART_AGGREGATE, into.expected(), &merge_events)?,
                StreamAppend::from_typed(source.0, CART_AGGREGATE, from.expected(), &discard_events)?,
            ])?;

            into.aggregate.apply_all(&merge_events);
            Ok(into.aggregate)
        })?;

        info!(cart_id = %target, source_cart_id = %source, "guest cart merged");

        Ok(merged)
    }
}
