use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use storefront_core::{
    Aggregate, AggregateId, AggregateRoot, CurrencyCode, DomainError, Money, ValidationErrors,
};
use storefront_events::Event;

use crate::code::CouponCode;
use crate::evaluator;

/// Coupon identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CouponId(pub AggregateId);

impl CouponId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CouponId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    /// `discount_value` is a percentage of the subtotal (0, 100].
    Percentage,
    /// `discount_value` is an amount off, never more than the subtotal.
    Fixed,
}

/// The immutable pricing terms of a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponTerms {
    pub code: CouponCode,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    /// Cap on the computed discount; percentage coupons only.
    pub max_discount_amount: Option<Money>,
    pub min_order_amount: Option<Money>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// `None` means unlimited redemptions.
    pub usage_limit: Option<u32>,
}

impl CouponTerms {
    pub fn percentage(code: CouponCode, percent: Decimal) -> Self {
        Self::with_type(code, DiscountType::Percentage, percent)
    }

    pub fn fixed(code: CouponCode, amount: Money) -> Self {
        Self::with_type(code, DiscountType::Fixed, amount.amount())
    }

    fn with_type(code: CouponCode, discount_type: DiscountType, value: Decimal) -> Self {
        Self {
            code,
            discount_type,
            discount_value: value,
            max_discount_amount: None,
            min_order_amount: None,
            valid_from: None,
            valid_until: None,
            usage_limit: None,
        }
    }

    pub fn capped_at(mut self, cap: Money) -> Self {
        self.max_discount_amount = Some(cap);
        self
    }

    pub fn with_min_order(mut self, minimum: Money) -> Self {
        self.min_order_amount = Some(minimum);
        self
    }

    pub fn valid_between(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    /// `true` when the subtotal reaches the minimum order amount (or there is none).
    pub fn meets_minimum(&self, subtotal: Money) -> bool {
        self.min_order_amount.is_none_or(|min| subtotal >= min)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let mut errors = ValidationErrors::new();

        if self.discount_value <= Decimal::ZERO {
            errors.push("discount_value", "must be greater than 0");
        }
        if self.discount_type == DiscountType::Percentage
            && self.discount_value > Decimal::ONE_HUNDRED
        {
            errors.push("discount_value", "must be at most 100 for percentage coupons");
        }
        match (self.discount_type, self.max_discount_amount) {
            (DiscountType::Fixed, Some(_)) => {
                errors.push("max_discount_amount", "only applies to percentage coupons");
            }
            (DiscountType::Percentage, Some(cap)) if !cap.is_positive() => {
                errors.push("max_discount_amount", "must be greater than 0");
            }
            _ => {}
        }
        if let Some(min) = self.min_order_amount {
            if min < Money::ZERO {
                errors.push("min_order_amount", "cannot be negative");
            }
        }
        if let (Some(from), Some(until)) = (self.valid_from, self.valid_until) {
            if from >= until {
                errors.push("valid_until", "must be after valid_from");
            }
        }
        if self.usage_limit == Some(0) {
            errors.push("usage_limit", "must be greater than 0");
        }

        errors.into_result()
    }
}

/// Read-only view of a coupon record, handed to carts and checkouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponSnapshot {
    pub coupon_id: CouponId,
    pub terms: CouponTerms,
    pub active: bool,
    pub used_count: u32,
}

impl CouponSnapshot {
    pub fn is_exhausted(&self) -> bool {
        self.terms.usage_limit.is_some_and(|limit| self.used_count >= limit)
    }
}

/// A coupon attached to a cart: the record's id plus the terms it was applied with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub coupon_id: CouponId,
    pub terms: CouponTerms,
}

impl AppliedCoupon {
    pub fn code(&self) -> &CouponCode {
        &self.terms.code
    }

    /// Discount for `subtotal`; zero while the subtotal is under the minimum order.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        if !self.terms.meets_minimum(subtotal) {
            return Money::ZERO;
        }
        evaluator::calculate_discount(&self.terms, subtotal)
    }
}

impl From<&CouponSnapshot> for AppliedCoupon {
    fn from(snapshot: &CouponSnapshot) -> Self {
        Self {
            coupon_id: snapshot.coupon_id,
            terms: snapshot.terms.clone(),
        }
    }
}

/// Aggregate root: Coupon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    id: CouponId,
    terms: Option<CouponTerms>,
    active: bool,
    used_count: u32,
    version: u64,
    created: bool,
}

impl Coupon {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CouponId) -> Self {
        Self {
            id,
            terms: None,
            active: false,
            used_count: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CouponId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn terms(&self) -> Option<&CouponTerms> {
        self.terms.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn used_count(&self) -> u32 {
        self.used_count
    }

    pub fn snapshot(&self) -> Option<CouponSnapshot> {
        self.terms.as_ref().map(|terms| CouponSnapshot {
            coupon_id: self.id,
            terms: terms.clone(),
            active: self.active,
            used_count: self.used_count,
        })
    }
}

impl AggregateRoot for Coupon {
    type Id = CouponId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateCoupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCoupon {
    pub coupon_id: CouponId,
    pub terms: CouponTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateCoupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateCoupon {
    pub coupon_id: CouponId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RedeemCoupon.
///
/// Issued once per placed order. Eligibility is re-checked against the order's
/// subtotal at `occurred_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCoupon {
    pub coupon_id: CouponId,
    pub order_id: AggregateId,
    pub subtotal: Money,
    pub currency: CurrencyCode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponCommand {
    CreateCoupon(CreateCoupon),
    DeactivateCoupon(DeactivateCoupon),
    RedeemCoupon(RedeemCoupon),
}

/// Event: CouponCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponCreated {
    pub coupon_id: CouponId,
    pub terms: CouponTerms,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponDeactivated {
    pub coupon_id: CouponId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponRedeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRedeemed {
    pub coupon_id: CouponId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponEvent {
    CouponCreated(CouponCreated),
    CouponDeactivated(CouponDeactivated),
    CouponRedeemed(CouponRedeemed),
}

impl Event for CouponEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CouponEvent::CouponCreated(_) => "coupons.coupon.created",
            CouponEvent::CouponDeactivated(_) => "coupons.coupon.deactivated",
            CouponEvent::CouponRedeemed(_) => "coupons.coupon.redeemed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CouponEvent::CouponCreated(e) => e.occurred_at,
            CouponEvent::CouponDeactivated(e) => e.occurred_at,
            CouponEvent::CouponRedeemed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Coupon {
    type Command = CouponCommand;
    type Event = CouponEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CouponEvent::CouponCreated(e) => {
                self.id = e.coupon_id;
                self.terms = Some(e.terms.clone());
                self.active = true;
                self.used_count = 0;
                self.created = true;
            }
            CouponEvent::CouponDeactivated(_) => {
                self.active = false;
            }
            CouponEvent::CouponRedeemed(_) => {
                self.used_count = self.used_count.saturating_add(1);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CouponCommand::CreateCoupon(cmd) => self.handle_create(cmd),
            CouponCommand::DeactivateCoupon(cmd) => self.handle_deactivate(cmd),
            CouponCommand::RedeemCoupon(cmd) => self.handle_redeem(cmd),
        }
    }
}

impl Coupon {
    fn ensure_coupon_id(&self, coupon_id: CouponId) -> Result<(), DomainError> {
        if self.id != coupon_id {
            return Err(DomainError::invariant("coupon_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateCoupon) -> Result<Vec<CouponEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("coupon already exists"));
        }
        cmd.terms.validate()?;

        Ok(vec![CouponEvent::CouponCreated(CouponCreated {
            coupon_id: cmd.coupon_id,
            terms: cmd.terms.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateCoupon,
    ) -> Result<Vec<CouponEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_coupon_id(cmd.coupon_id)?;

        if !self.active {
            return Ok(vec![]);
        }

        Ok(vec![CouponEvent::CouponDeactivated(CouponDeactivated {
            coupon_id: cmd.coupon_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_redeem(&self, cmd: &RedeemCoupon) -> Result<Vec<CouponEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_coupon_id(cmd.coupon_id)?;

        let snapshot = self.snapshot().ok_or_else(DomainError::not_found)?;
        evaluator::check_eligibility(&snapshot, cmd.subtotal, cmd.occurred_at)
            .map_err(|reason| reason.into_error(&cmd.currency))?;

        Ok(vec![CouponEvent::CouponRedeemed(CouponRedeemed {
            coupon_id: cmd.coupon_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
