use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use storefront_core::{AggregateId, DomainError};
use storefront_coupons::{
    Coupon, CouponCode, CouponCommand, CouponId, CouponSnapshot, CouponTerms, CreateCoupon,
    DeactivateCoupon,
};
use storefront_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStore;
use crate::read_model::IndexError;

use super::{COUPON_AGGREGATE, Storefront};

impl<S, B> Storefront<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create a coupon under a code no other coupon uses.
    #[instrument(skip(self, terms), fields(code = %terms.code.as_str()), err)]
    pub fn create_coupon(&self, terms: CouponTerms) -> Result<Coupon, DispatchError> {
        terms.validate()?;

        let coupon_id = CouponId::new(AggregateId::new());
        let code = terms.code.clone();

        self.coupons_by_code
            .insert_unique(code.clone(), coupon_id)
            .map_err(|err| match err {
                IndexError::Taken => {
                    DispatchError::from(DomainError::validation("code", "has already been taken"))
                }
                IndexError::Poisoned => DispatchError::Conflict(err.to_string()),
            })?;

        let command = CouponCommand::CreateCoupon(CreateCoupon {
            coupon_id,
            terms,
            occurred_at: self.clock.now(),
        });

        match self.dispatcher.dispatch(coupon_id.0, COUPON_AGGREGATE, &command, |id| {
            Coupon::empty(CouponId::new(id))
        }) {
            Ok(dispatched) => {
                info!(coupon_id = %coupon_id, "coupon created");
                Ok(dispatched.aggregate)
            }
            Err(err) => {
                self.coupons_by_code.remove(&code);
                Err(err)
            }
        }
    }

    pub fn deactivate_coupon(&self, coupon_id: CouponId) -> Result<Coupon, DispatchError> {
        let command = CouponCommand::DeactivateCoupon(DeactivateCoupon {
            coupon_id,
            occurred_at: self.clock.now(),
        });

        let dispatched = self.dispatcher.dispatch(coupon_id.0, COUPON_AGGREGATE, &command, |id| {
            Coupon::empty(CouponId::new(id))
        })?;
        info!(coupon_id = %coupon_id, "coupon deactivated");

        Ok(dispatched.aggregate)
    }

    /// The coupon record behind a normalized code, if one exists.
    pub fn find_coupon(&self, code: &CouponCode) -> Result<Option<CouponSnapshot>, DispatchError> {
        let Some(coupon_id) = self.coupons_by_code.get(code) else {
            return Ok(None);
        };

        match self.load_coupon(coupon_id) {
            Ok(loaded) => Ok(loaded.aggregate.snapshot()),
            Err(DispatchError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
