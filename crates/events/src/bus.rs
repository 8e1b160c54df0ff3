//! Fan-out of committed storefront events.
//!
//! Once a cart, checkout, order or coupon stream has been appended to, the
//! dispatcher hands each stored event to the bus. Consumers live outside the
//! pricing core: order confirmation mailers and fulfilment webhooks listen for
//! `checkout.order.placed`, reminder jobs for `carts.cart.abandoned`, analytics
//! for everything. The event store stays the source of truth; a consumer that
//! missed something replays the stream.
//!
//! Delivery is at-least-once. A publish that fails after the append surfaces to
//! the caller, and publishing the same events again is allowed, so consumers key
//! their side effects on `event_id`.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

/// One consumer's queue. Every subscription sees every message published after
/// it was created, in publish order.
///
/// ```ignore
/// let orders = storefront.subscribe();
/// while let Some(envelope) = orders.wait(Duration::from_secs(1)) {
///     if envelope.event_type == "checkout.order.placed" {
///         mailer.send_confirmation(&envelope)?;
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// The next message, if one arrives within `timeout`. `None` also covers a
    /// bus that has been dropped.
    pub fn wait(&self, timeout: Duration) -> Option<M> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Everything queued right now, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Where the dispatcher publishes committed events.
///
/// Publication happens strictly after a successful append; a failed publish
/// leaves the events stored.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
