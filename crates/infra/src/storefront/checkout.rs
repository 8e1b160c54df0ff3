use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use storefront_carts::{CartCommand, CartCoupon, CartId, CartTotals, MarkConverted};
use storefront_catalog::ShippingMethodId;
use storefront_checkout::{
    Address, CancelCheckout, CancelReason, Checkout, CheckoutCommand, CheckoutId, CheckoutStatus,
    CheckoutSummary, CompleteCheckout, Order, OrderCommand, OrderId, PlaceOrder, StartCheckout,
    SubmitPaymentInfo, SubmitShippingInfo,
};
use storefront_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, RejectionReason};
use storefront_coupons::{AppliedCoupon, CouponCommand, RedeemCoupon};
use storefront_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::DispatchError;
use crate::event_store::{EventStore, StreamAppend};

use super::{
    CART_AGGREGATE, CHECKOUT_AGGREGATE, COUPON_AGGREGATE, ORDER_AGGREGATE, Storefront,
};

impl<S, B> Storefront<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a checkout for the cart, or resume the one already open.
    #[instrument(skip(self), fields(cart_id = %cart_id), err)]
    pub fn start_checkout(&self, cart_id: CartId) -> Result<Checkout, DispatchError> {
        let now = self.clock.now();
        let cart = self.load_cart(cart_id)?.aggregate;

        if !cart.is_active() {
            return Err(DomainError::rejected(
                RejectionReason::CartInactive,
                "This cart can no longer be checked out",
            )
            .into());
        }

        if let Some(checkout_id) = self.checkouts_by_cart.get(&cart_id) {
            match self.load_checkout(checkout_id) {
                Ok(loaded) if loaded.aggregate.is_open(now) => return Ok(loaded.aggregate),
                Ok(loaded) if !loaded.aggregate.is_terminal() => {
                    self.close_checkout(checkout_id, CancelReason::Expired)?;
                }
                Ok(_) | Err(DispatchError::NotFound) => {
                    self.checkouts_by_cart.remove(&cart_id);
                }
                Err(err) => return Err(err),
            }
        }

        let snapshot = cart.snapshot().ok_or(DispatchError::NotFound)?;
        let ttl = self.config.checkout_ttl();
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            DispatchError::InvariantViolation(format!("checkout lifetime {ttl} overflows"))
        })?;
        let checkout_id = CheckoutId::new(AggregateId::new());
        let command = CheckoutCommand::StartCheckout(StartCheckout {
            checkout_id,
            cart: snapshot,
            expires_at,
            occurred_at: now,
        });

        let checkout = self.dispatch_checkout(checkout_id, &command)?;
        self.checkouts_by_cart.upsert(cart_id, checkout_id);
        info!(checkout_id = %checkout_id, cart_id = %cart_id, "checkout started");

        Ok(checkout)
    }

    #[instrument(skip(self, address), fields(checkout_id = %checkout_id), err)]
    pub fn submit_shipping_info(
        &self,
        checkout_id: CheckoutId,
        address: Address,
        shipping_method_id: &str,
    ) -> Result<Checkout, DispatchError> {
        let shipping_method_id = ShippingMethodId::new(shipping_method_id);
        let shipping_method = if shipping_method_id.is_blank() {
            None
        } else {
            self.shipping.shipping_method(&shipping_method_id)
        };

        let command = CheckoutCommand::SubmitShippingInfo(SubmitShippingInfo {
            checkout_id,
            address,
            shipping_method_id,
            shipping_method,
            occurred_at: self.clock.now(),
        });

        let checkout = self.dispatch_checkout(checkout_id, &command)?;
        info!(checkout_id = %checkout_id, status = ?checkout.status(), "shipping info submitted");
        Ok(checkout)
    }

    #[instrument(skip(self), fields(checkout_id = %checkout_id), err)]
    pub fn submit_payment_info(
        &self,
        checkout_id: CheckoutId,
        payment_method: &str,
    ) -> Result<Checkout, DispatchError> {
        // Review shows the cart as it is now.
        let cart = match self.load_checkout(checkout_id)?.aggregate.cart_id() {
            Some(cart_id) => self.load_cart(cart_id)?.aggregate.snapshot(),
            None => None,
        };

        let command = CheckoutCommand::SubmitPaymentInfo(SubmitPaymentInfo {
            checkout_id,
            payment_method: payment_method.to_string(),
            cart,
            occurred_at: self.clock.now(),
        });

        let checkout = self.dispatch_checkout(checkout_id, &command)?;
        info!(checkout_id = %checkout_id, status = ?checkout.status(), "payment info submitted");
        Ok(checkout)
    }

    /// Place the order.
    ///
    /// The cart must still hold what the shopper reviewed; otherwise the call
    /// fails with `CartChanged` and resubmitting payment refreshes the review.
    /// The coupon is re-checked against its live record and the cart's current
    /// lines are priced again. Coupon redemption, the order, the cart conversion
    /// and the checkout completion are then appended in one transaction: either
    /// all of them are committed or none is, and the checkout stays in review.
    ///
    /// Completing an already completed checkout returns its order.
    #[instrument(skip(self), fields(checkout_id = %checkout_id), err)]
    pub fn complete_checkout(&self, checkout_id: CheckoutId) -> Result<Order, DispatchError> {
        let order = self
            .dispatcher
            .with_retry("complete_checkout", || self.try_complete(checkout_id))
            .inspect_err(|err| {
                warn!(checkout_id = %checkout_id, error = %err, "checkout completion failed");
            })?;

        if let Some(cart_id) = order.cart_id() {
            self.checkouts_by_cart.remove(&cart_id);
            if let Some(owner) = order.owner() {
                if self.carts_by_owner.get(owner) == Some(cart_id) {
                    self.carts_by_owner.remove(owner);
                }
            }
        }

        Ok(order)
    }

    /// Cancel an open checkout. The cart is left as it is.
    #[instrument(skip(self), fields(checkout_id = %checkout_id), err)]
    pub fn cancel_checkout(&self, checkout_id: CheckoutId) -> Result<Checkout, DispatchError> {
        self.close_checkout(checkout_id, CancelReason::Abandoned)
    }

    pub fn checkout_summary(&self, checkout_id: CheckoutId) -> Result<CheckoutSummary, DispatchError> {
        Ok(self.load_checkout(checkout_id)?.aggregate.summary())
    }

    pub(super) fn close_checkout(
        &self,
        checkout_id: CheckoutId,
        reason: CancelReason,
    ) -> Result<Checkout, DispatchError> {
        let command = CheckoutCommand::CancelCheckout(CancelCheckout {
            checkout_id,
            reason,
            occurred_at: self.clock.now(),
        });

        let checkout = self.dispatch_checkout(checkout_id, &command)?;
        if let Some(cart_id) = checkout.cart_id() {
            if self.checkouts_by_cart.get(&cart_id) == Some(checkout_id) {
                self.checkouts_by_cart.remove(&cart_id);
            }
        }
        info!(checkout_id = %checkout_id, reason = ?reason, "checkout cancelled");

        Ok(checkout)
    }

    fn dispatch_checkout(
        &self,
        checkout_id: CheckoutId,
        command: &CheckoutCommand,
    ) -> Result<Checkout, DispatchError> {
        match self
            .dispatcher
            .dispatch(checkout_id.0, CHECKOUT_AGGREGATE, command, self.make_checkout())
        {
            Ok(dispatched) => Ok(dispatched.aggregate),
            Err(err) => {
                warn!(checkout_id = %checkout_id, error = %err, "checkout command rejected");
                Err(err)
            }
        }
    }

    /// One decide/append attempt of [`Storefront::complete_checkout`].
    fn try_complete(&self, checkout_id: CheckoutId) -> Result<Order, DispatchError> {
        let now = self.clock.now();
        let checkout = self.load_checkout(checkout_id)?;

        if checkout.aggregate.status() == CheckoutStatus::Completed {
            let order_id = checkout
                .aggregate
                .order_id()
                .ok_or_else(|| DispatchError::InvariantViolation("completed checkout has no order".to_string()))?;
            return self.order(OrderId::new(order_id));
        }

        let cart_id = checkout
            .aggregate
            .cart_id()
            .ok_or_else(|| DispatchError::InvariantViolation("checkout has no cart".to_string()))?;
        let cart = self.load_cart(cart_id)?;
        let mut snapshot = cart.aggregate.snapshot().ok_or(DispatchError::NotFound)?;

        let order_id = OrderId::new(AggregateId::new());
        let mut batches = Vec::with_capacity(4);

        // Re-check the coupon against its current record before redeeming it.
        let applied_coupon = snapshot
            .coupon
            .as_ref()
            .and_then(CartCoupon::applied)
            .map(|applied| applied.coupon_id);
        if let Some(coupon_id) = applied_coupon {
            let coupon = match self.load_coupon(coupon_id) {
                Ok(loaded) => loaded,
                Err(DispatchError::NotFound) => {
                    return Err(DomainError::rejected(
                        RejectionReason::CouponNotFound,
                        "Invalid coupon code",
                    )
                    .into());
                }
                Err(err) => return Err(err),
            };
            let live = coupon.aggregate.snapshot().ok_or(DispatchError::NotFound)?;

            snapshot.coupon = Some(CartCoupon::Applied(AppliedCoupon::from(&live)));
            snapshot.totals =
                CartTotals::estimate(&snapshot.items, snapshot.coupon.as_ref(), &self.config.pricing);

            let redeemed = coupon.aggregate.handle(&CouponCommand::RedeemCoupon(RedeemCoupon {
                coupon_id: live.coupon_id,
                order_id: order_id.0,
                subtotal: snapshot.totals.subtotal,
                currency: snapshot.currency.clone(),
                occurred_at: now,
            }))?;
            batches.push(StreamAppend::from_typed(
                live.coupon_id.0,
                COUPON_AGGREGATE,
                coupon.expected(),
                &redeemed,
            )?);
        }

        let completed_events =
            checkout
                .aggregate
                .handle(&CheckoutCommand::CompleteCheckout(CompleteCheckout {
                    checkout_id,
                    order_id: order_id.0,
                    cart: snapshot,
                    occurred_at: now,
                }))?;
        let mut completed = checkout.aggregate.clone();
        completed.apply_all(&completed_events);

        let mut order = Order::empty(order_id);
        let placed = order.handle(&OrderCommand::PlaceOrder(PlaceOrder::from_checkout(
            &completed, order_id,
        )?))?;

        let converted = cart.aggregate.handle(&CartCommand::MarkConverted(MarkConverted {
            cart_id,
            order_id: order_id.0,
            occurred_at: now,
        }))?;

        batches.push(StreamAppend::from_typed(
            order_id.0,
            ORDER_AGGREGATE,
            ExpectedVersion::Exact(0),
            &placed,
        )?);
        batches.push(StreamAppend::from_typed(
            cart_id.0,
            CART_AGGREGATE,
            cart.expected(),
            &converted,
        )?);
        batches.push(StreamAppend::from_typed(
            checkout_id.0,
            CHECKOUT_AGGREGATE,
            checkout.expected(),
            &completed_events,
        )?);

        self.dispatcher.commit(batches)?;

        order.apply_all(&placed);
        info!(
            order_id = %order_id,
            order_number = %order.order_number(),
            total = %order.totals().total,
            "order placed"
        );

        Ok(order)
    }
}
