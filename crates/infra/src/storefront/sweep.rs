use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use storefront_carts::{Cart, CartCommand, MarkAbandoned};
use storefront_checkout::CancelReason;
use storefront_events::{EventBus, EventEnvelope};

use crate::event_store::EventStore;

use super::Storefront;

/// What one sweep run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub affected: usize,
    pub failed: usize,
}

impl<S, B> Storefront<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Abandon guest carts that expired, or sat empty past the idle window.
    ///
    /// User carts are left alone; they are replaced the next time the user
    /// resolves a cart.
    #[instrument(skip(self))]
    pub fn abandon_stale_carts(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for cart_id in self.carts_by_owner.values() {
            let cart = match self.load_cart(cart_id) {
                Ok(loaded) => loaded.aggregate,
                Err(err) => {
                    warn!(cart_id = %cart_id, error = %err, "cart could not be loaded for sweep");
                    report.failed += 1;
                    continue;
                }
            };
            let Some(owner) = cart.owner().cloned() else {
                continue;
            };
            if !owner.is_guest() {
                continue;
            }
            report.examined += 1;

            if !cart.is_active() {
                self.carts_by_owner.remove(&owner);
                continue;
            }
            if !self.is_stale(&cart, now) {
                continue;
            }

            let command = CartCommand::MarkAbandoned(MarkAbandoned {
                cart_id,
                occurred_at: now,
            });
            match self.dispatch_cart(cart_id, &command) {
                Ok(_) => {
                    self.carts_by_owner.remove(&owner);
                    report.affected += 1;
                }
                Err(_) => report.failed += 1,
            }
        }

        info!(
            examined = report.examined,
            abandoned = report.affected,
            failed = report.failed,
            "stale cart sweep finished"
        );
        report
    }

    /// Cancel every unfinished checkout past its expiry.
    #[instrument(skip(self))]
    pub fn expire_checkouts(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for checkout_id in self.checkouts_by_cart.values() {
            let checkout = match self.load_checkout(checkout_id) {
                Ok(loaded) => loaded.aggregate,
                Err(err) => {
                    warn!(checkout_id = %checkout_id, error = %err, "checkout could not be loaded for sweep");
                    report.failed += 1;
                    continue;
                }
            };
            report.examined += 1;

            if checkout.is_terminal() {
                if let Some(cart_id) = checkout.cart_id() {
                    self.checkouts_by_cart.remove(&cart_id);
                }
                continue;
            }
            if !checkout.is_expired(now) {
                continue;
            }

            match self.close_checkout(checkout_id, CancelReason::Expired) {
                Ok(_) => report.affected += 1,
                Err(err) => {
                    warn!(checkout_id = %checkout_id, error = %err, "checkout expiry failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            expired = report.affected,
            failed = report.failed,
            "checkout expiry sweep finished"
        );
        report
    }

    fn is_stale(&self, cart: &Cart, now: DateTime<Utc>) -> bool {
        if cart.is_expired(now) {
            return true;
        }
        cart.is_empty()
            && cart
                .updated_at()
                .is_some_and(|at| now - at >= self.config.empty_cart_idle())
    }
}
