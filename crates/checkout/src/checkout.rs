use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_carts::{CartCoupon, CartId, CartOwner, CartSnapshot, CartTotals, PricingPolicy};
use storefront_catalog::{ShippingMethod, ShippingMethodId};
use storefront_core::{Aggregate, AggregateId, AggregateRoot, DomainError, RejectionReason};
use storefront_events::Event;

use crate::address::Address;
use crate::pricing::checkout_totals;

/// Checkout session identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutId(pub AggregateId);

impl CheckoutId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CheckoutId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Checkout status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Started,
    ShippingInfo,
    PaymentInfo,
    Review,
    Completed,
    Cancelled,
}

impl CheckoutStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CheckoutStatus::Completed | CheckoutStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The shopper walked away or asked to start over.
    Abandoned,
    /// Swept after `expires_at`.
    Expired,
}

/// Aggregate root: Checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    id: CheckoutId,
    cart: Option<CartSnapshot>,
    status: CheckoutStatus,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    shipping_method: Option<ShippingMethod>,
    payment_method: Option<String>,
    totals: CartTotals,
    policy: PricingPolicy,
    expires_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    order_id: Option<AggregateId>,
    cancel_reason: Option<CancelReason>,
    version: u64,
    created: bool,
}

impl Checkout {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CheckoutId) -> Self {
        Self::with_policy(id, PricingPolicy::default())
    }

    pub fn with_policy(id: CheckoutId, policy: PricingPolicy) -> Self {
        Self {
            id,
            cart: None,
            status: CheckoutStatus::Started,
            shipping_address: None,
            billing_address: None,
            shipping_method: None,
            payment_method: None,
            totals: CartTotals::default(),
            policy,
            expires_at: None,
            completed_at: None,
            order_id: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CheckoutId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn status(&self) -> CheckoutStatus {
        self.status
    }

    pub fn cart(&self) -> Option<&CartSnapshot> {
        self.cart.as_ref()
    }

    pub fn cart_id(&self) -> Option<CartId> {
        self.cart.as_ref().map(|cart| cart.cart_id)
    }

    pub fn owner(&self) -> Option<&CartOwner> {
        self.cart.as_ref().map(|cart| &cart.owner)
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref()
    }

    pub fn shipping_method(&self) -> Option<&ShippingMethod> {
        self.shipping_method.as_ref()
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.cart.as_ref().and_then(CartSnapshot::coupon_code)
    }

    pub fn totals(&self) -> &CartTotals {
        &self.totals
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Non-terminal and not yet expired: can be resumed by `start_checkout`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.created && !self.is_terminal() && !self.is_expired(now)
    }

    /// Every gate that completion depends on still holds.
    pub fn is_ready_to_complete(&self) -> bool {
        self.shipping_address.is_some()
            && self.shipping_method.is_some()
            && self.billing_address.is_some()
            && self.payment_method.is_some()
    }
}

impl AggregateRoot for Checkout {
    type Id = CheckoutId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: StartCheckout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCheckout {
    pub checkout_id: CheckoutId,
    pub cart: CartSnapshot,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitShippingInfo.
///
/// `shipping_method` is what `shipping_method_id` resolved to, if anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitShippingInfo {
    pub checkout_id: CheckoutId,
    pub address: Address,
    pub shipping_method_id: ShippingMethodId,
    pub shipping_method: Option<ShippingMethod>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitPaymentInfo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPaymentInfo {
    pub checkout_id: CheckoutId,
    pub payment_method: String,
    /// The cart as it is now; becomes what the review step shows.
    pub cart: Option<CartSnapshot>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteCheckout.
///
/// `cart` is the source cart re-read at completion time. Its lines and coupon
/// must match what was reviewed; the final totals are computed from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteCheckout {
    pub checkout_id: CheckoutId,
    pub order_id: AggregateId,
    pub cart: CartSnapshot,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelCheckout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCheckout {
    pub checkout_id: CheckoutId,
    pub reason: CancelReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutCommand {
    StartCheckout(StartCheckout),
    SubmitShippingInfo(SubmitShippingInfo),
    SubmitPaymentInfo(SubmitPaymentInfo),
    CompleteCheckout(CompleteCheckout),
    CancelCheckout(CancelCheckout),
}

/// Event: CheckoutStarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutStarted {
    pub checkout_id: CheckoutId,
    pub cart: CartSnapshot,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShippingStepEntered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingStepEntered {
    pub checkout_id: CheckoutId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShippingInfoSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfoSubmitted {
    pub checkout_id: CheckoutId,
    pub address: Address,
    pub shipping_method: ShippingMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentInfoSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfoSubmitted {
    pub checkout_id: CheckoutId,
    pub payment_method: String,
    pub billing_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart: Option<CartSnapshot>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CheckoutCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCompleted {
    pub checkout_id: CheckoutId,
    pub order_id: AggregateId,
    pub cart: CartSnapshot,
    pub totals: CartTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CheckoutCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCancelled {
    pub checkout_id: CheckoutId,
    pub reason: CancelReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckoutEvent {
    CheckoutStarted(CheckoutStarted),
    ShippingStepEntered(ShippingStepEntered),
    ShippingInfoSubmitted(ShippingInfoSubmitted),
    PaymentInfoSubmitted(PaymentInfoSubmitted),
    CheckoutCompleted(CheckoutCompleted),
    CheckoutCancelled(CheckoutCancelled),
}

impl Event for CheckoutEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CheckoutEvent::CheckoutStarted(_) => "checkout.checkout.started",
            CheckoutEvent::ShippingStepEntered(_) => "checkout.checkout.shipping_step_entered",
            CheckoutEvent::ShippingInfoSubmitted(_) => "checkout.checkout.shipping_info_submitted",
            CheckoutEvent::PaymentInfoSubmitted(_) => "checkout.checkout.payment_info_submitted",
            CheckoutEvent::CheckoutCompleted(_) => "checkout.checkout.completed",
            CheckoutEvent::CheckoutCancelled(_) => "checkout.checkout.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CheckoutEvent::CheckoutStarted(e) => e.occurred_at,
            CheckoutEvent::ShippingStepEntered(e) => e.occurred_at,
            CheckoutEvent::ShippingInfoSubmitted(e) => e.occurred_at,
            CheckoutEvent::PaymentInfoSubmitted(e) => e.occurred_at,
            CheckoutEvent::CheckoutCompleted(e) => e.occurred_at,
            CheckoutEvent::CheckoutCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Checkout {
    type Command = CheckoutCommand;
    type Event = CheckoutEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CheckoutEvent::CheckoutStarted(e) => {
                self.id = e.checkout_id;
                self.cart = Some(e.cart.clone());
                self.status = CheckoutStatus::Started;
                self.expires_at = Some(e.expires_at);
                self.created = true;
            }
            CheckoutEvent::ShippingStepEntered(_) => {
                self.status = CheckoutStatus::ShippingInfo;
            }
            CheckoutEvent::ShippingInfoSubmitted(e) => {
                self.shipping_address = Some(e.address.clone());
                self.shipping_method = Some(e.shipping_method.clone());
                self.status = CheckoutStatus::PaymentInfo;
            }
            CheckoutEvent::PaymentInfoSubmitted(e) => {
                self.payment_method = Some(e.payment_method.clone());
                self.billing_address = Some(e.billing_address.clone());
                if let Some(cart) = &e.cart {
                    self.cart = Some(cart.clone());
                }
                self.status = CheckoutStatus::Review;
            }
            CheckoutEvent::CheckoutCompleted(e) => {
                self.cart = Some(e.cart.clone());
                self.order_id = Some(e.order_id);
                self.completed_at = Some(e.occurred_at);
                self.status = CheckoutStatus::Completed;
            }
            CheckoutEvent::CheckoutCancelled(e) => {
                self.cancel_reason = Some(e.reason);
                self.status = CheckoutStatus::Cancelled;
            }
        }

        if let Some(cart) = &self.cart {
            self.totals = checkout_totals(cart, self.shipping_method.as_ref(), &self.policy);
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CheckoutCommand::StartCheckout(cmd) => self.handle_start(cmd),
            CheckoutCommand::SubmitShippingInfo(cmd) => self.handle_shipping(cmd),
            CheckoutCommand::SubmitPaymentInfo(cmd) => self.handle_payment(cmd),
            CheckoutCommand::CompleteCheckout(cmd) => self.handle_complete(cmd),
            CheckoutCommand::CancelCheckout(cmd) => self.handle_cancel(cmd),
        }
    }
}

/// Same lines and same coupon code; coupon terms may have been re-read.
fn same_order(reviewed: &CartSnapshot, live: &CartSnapshot) -> bool {
    reviewed.items == live.items
        && reviewed.coupon.as_ref().map(CartCoupon::code) == live.coupon.as_ref().map(CartCoupon::code)
}

fn invalid_state(message: impl Into<String>) -> DomainError {
    DomainError::rejected(RejectionReason::InvalidState, message)
}

impl Checkout {
    fn ensure_checkout_id(&self, checkout_id: CheckoutId) -> Result<(), DomainError> {
        if self.id != checkout_id {
            return Err(DomainError::invariant("checkout_id mismatch"));
        }
        Ok(())
    }

    /// Exists, addressed to this session, not terminal and not expired.
    fn ensure_open(
        &self,
        checkout_id: CheckoutId,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_checkout_id(checkout_id)?;

        if self.is_terminal() {
            return Err(invalid_state("This checkout has already been closed"));
        }
        if self.is_expired(now) {
            return Err(DomainError::rejected(
                RejectionReason::CheckoutExpired,
                "Your checkout session has expired",
            ));
        }
        Ok(())
    }

    fn handle_start(&self, cmd: &StartCheckout) -> Result<Vec<CheckoutEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("checkout already exists"));
        }
        if cmd.cart.is_empty() {
            return Err(DomainError::rejected(
                RejectionReason::EmptyCart,
                "Your cart is empty",
            ));
        }

        Ok(vec![CheckoutEvent::CheckoutStarted(CheckoutStarted {
            checkout_id: cmd.checkout_id,
            cart: cmd.cart.clone(),
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_shipping(
        &self,
        cmd: &SubmitShippingInfo,
    ) -> Result<Vec<CheckoutEvent>, DomainError> {
        self.ensure_open(cmd.checkout_id, cmd.occurred_at)?;

        let address = cmd.address.normalized();
        address.validate()?;

        let method = cmd
            .shipping_method
            .as_ref()
            .filter(|method| method.active && method.id == cmd.shipping_method_id)
            .ok_or_else(|| {
                DomainError::rejected(
                    RejectionReason::ShippingMethodUnavailable,
                    "Please select a valid shipping method",
                )
            })?;

        let mut events = Vec::with_capacity(2);
        if self.status == CheckoutStatus::Started {
            events.push(CheckoutEvent::ShippingStepEntered(ShippingStepEntered {
                checkout_id: cmd.checkout_id,
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(CheckoutEvent::ShippingInfoSubmitted(ShippingInfoSubmitted {
            checkout_id: cmd.checkout_id,
            address,
            shipping_method: method.clone(),
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_payment(
        &self,
        cmd: &SubmitPaymentInfo,
    ) -> Result<Vec<CheckoutEvent>, DomainError> {
        self.ensure_open(cmd.checkout_id, cmd.occurred_at)?;

        if !matches!(
            self.status,
            CheckoutStatus::PaymentInfo | CheckoutStatus::Review
        ) {
            return Err(invalid_state("Please complete the shipping step first"));
        }

        let payment_method = cmd.payment_method.trim();
        if payment_method.is_empty() {
            return Err(DomainError::validation("payment_method", "can't be blank"));
        }

        let billing_address = self
            .shipping_address
            .clone()
            .ok_or_else(|| invalid_state("Please complete the shipping step first"))?;

        if let Some(cart) = &cmd.cart {
            if self.cart_id() != Some(cart.cart_id) {
                return Err(DomainError::invariant("cart does not belong to this checkout"));
            }
            if cart.is_empty() {
                return Err(DomainError::rejected(
                    RejectionReason::EmptyCart,
                    "Your cart is empty",
                ));
            }
        }

        Ok(vec![CheckoutEvent::PaymentInfoSubmitted(PaymentInfoSubmitted {
            checkout_id: cmd.checkout_id,
            payment_method: payment_method.to_string(),
            billing_address,
            cart: cmd.cart.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(
        &self,
        cmd: &CompleteCheckout,
    ) -> Result<Vec<CheckoutEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_checkout_id(cmd.checkout_id)?;

        if self.status != CheckoutStatus::Review {
            return Err(invalid_state("Checkout is not ready to be completed"));
        }
        self.ensure_open(cmd.checkout_id, cmd.occurred_at)?;

        if !self.is_ready_to_complete() {
            return Err(invalid_state("Checkout is missing shipping or payment details"));
        }
        if self.cart_id() != Some(cmd.cart.cart_id) {
            return Err(DomainError::invariant("cart does not belong to this checkout"));
        }
        if cmd.cart.is_empty() {
            return Err(DomainError::rejected(
                RejectionReason::EmptyCart,
                "Your cart is empty",
            ));
        }
        if !self.cart.as_ref().is_some_and(|reviewed| same_order(reviewed, &cmd.cart)) {
            return Err(DomainError::rejected(
                RejectionReason::CartChanged,
                "Your cart changed since you reviewed it, please review your order again",
            ));
        }

        let totals = checkout_totals(&cmd.cart, self.shipping_method.as_ref(), &self.policy);

        Ok(vec![CheckoutEvent::CheckoutCompleted(CheckoutCompleted {
            checkout_id: cmd.checkout_id,
            order_id: cmd.order_id,
            cart: cmd.cart.clone(),
            totals,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelCheckout) -> Result<Vec<CheckoutEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_checkout_id(cmd.checkout_id)?;

        if self.is_terminal() {
            return Err(invalid_state("This checkout has already been closed"));
        }

        Ok(vec![CheckoutEvent::CheckoutCancelled(CheckoutCancelled {
            checkout_id: cmd.checkout_id,
            reason: cmd.reason,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use storefront_carts::{CartItem, CartItemId};
    use storefront_catalog::{Product, ProductId};
    use storefront_core::{CurrencyCode, Money, UserId};

    fn test_checkout_id() -> CheckoutId {
        CheckoutId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn cart_snapshot(lines: &[(i64, u32)]) -> CartSnapshot {
        let items: Vec<CartItem> = lines
            .iter()
            .map(|(cents, quantity)| {
                let product = Product::new(
                    ProductId::new(AggregateId::new()),
                    "SKU",
                    "Lamp",
                    Money::from_cents(*cents),
                )
                .with_weight(Decimal::ONE);
                CartItem::from_product(
                    CartItemId::new(AggregateId::new()),
                    &product,
                    *quantity,
                    BTreeMap::new(),
                )
            })
            .collect();
        CartSnapshot {
            cart_id: CartId::new(AggregateId::new()),
            owner: CartOwner::User(UserId::new()),
            currency: CurrencyCode::usd(),
            totals: CartTotals::estimate(&items, None, &PricingPolicy::default()),
            items,
            coupon: None,
        }
    }

    fn address() -> Address {
        Address {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            address1: "1 Navy Yard".to_string(),
            city: "Arlington".to_string(),
            state: "VA".to_string(),
            postal_code: "22202".to_string(),
            country: "us".to_string(),
            ..Address::default()
        }
    }

    fn ground() -> ShippingMethod {
        ShippingMethod {
            id: ShippingMethodId::new("ground"),
            name: "Ground".to_string(),
            active: true,
            base_cost: Money::from_major(7),
            cost_per_kg: Money::from_major(1),
            free_shipping_threshold: None,
        }
    }

    fn started(cart: &CartSnapshot) -> Checkout {
        let checkout_id = test_checkout_id();
        let mut checkout = Checkout::empty(checkout_id);
        checkout
            .execute(&CheckoutCommand::StartCheckout(StartCheckout {
                checkout_id,
                cart: cart.clone(),
                expires_at: test_time() + Duration::hours(2),
                occurred_at: test_time(),
            }))
            .unwrap();
        checkout
    }

    fn submit_shipping(checkout: &mut Checkout) -> Result<Vec<CheckoutEvent>, DomainError> {
        checkout.execute(&CheckoutCommand::SubmitShippingInfo(SubmitShippingInfo {
            checkout_id: checkout.id_typed(),
            address: address(),
            shipping_method_id: ShippingMethodId::new("ground"),
            shipping_method: Some(ground()),
            occurred_at: test_time(),
        }))
    }

    fn submit_payment(checkout: &mut Checkout) -> Result<Vec<CheckoutEvent>, DomainError> {
        submit_payment_with(checkout, None)
    }

    fn submit_payment_with(
        checkout: &mut Checkout,
        cart: Option<&CartSnapshot>,
    ) -> Result<Vec<CheckoutEvent>, DomainError> {
        checkout.execute(&CheckoutCommand::SubmitPaymentInfo(SubmitPaymentInfo {
            checkout_id: checkout.id_typed(),
            payment_method: "credit_card".to_string(),
            cart: cart.cloned(),
            occurred_at: test_time(),
        }))
    }

    fn complete(
        checkout: &mut Checkout,
        cart: &CartSnapshot,
        at: DateTime<Utc>,
    ) -> Result<Vec<CheckoutEvent>, DomainError> {
        checkout.execute(&CheckoutCommand::CompleteCheckout(CompleteCheckout {
            checkout_id: checkout.id_typed(),
            order_id: AggregateId::new(),
            cart: cart.clone(),
            occurred_at: at,
        }))
    }

    #[test]
    fn start_requires_items() {
        let checkout_id = test_checkout_id();
        let err = Checkout::empty(checkout_id)
            .handle(&CheckoutCommand::StartCheckout(StartCheckout {
                checkout_id,
                cart: cart_snapshot(&[]),
                expires_at: test_time() + Duration::hours(2),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.reason(), Some(RejectionReason::EmptyCart));
    }

    #[test]
    fn start_mirrors_cart_totals() {
        let cart = cart_snapshot(&[(3000, 2)]);
        let checkout = started(&cart);
        assert_eq!(checkout.status(), CheckoutStatus::Started);
        assert_eq!(checkout.totals(), &cart.totals);
        assert!(checkout.is_open(test_time()));
    }

    #[test]
    fn shipping_passes_through_shipping_info_step() {
        let cart = cart_snapshot(&[(3000, 2)]);
        let mut checkout = started(&cart);

        let events = submit_shipping(&mut checkout).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], CheckoutEvent::ShippingStepEntered(_)));
        assert!(matches!(events[1], CheckoutEvent::ShippingInfoSubmitted(_)));

        assert_eq!(checkout.status(), CheckoutStatus::PaymentInfo);
        assert_eq!(checkout.shipping_address().unwrap().country, "US");
        // 7.00 + 1.00 * 2kg
        assert_eq!(checkout.totals().shipping_amount, Money::from_major(9));
    }

    #[test]
    fn invalid_address_keeps_status() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);

        let err = checkout
            .execute(&CheckoutCommand::SubmitShippingInfo(SubmitShippingInfo {
                checkout_id: checkout.id_typed(),
                address: Address {
                    postal_code: String::new(),
                    ..address()
                },
                shipping_method_id: ShippingMethodId::new("ground"),
                shipping_method: Some(ground()),
                occurred_at: test_time(),
            }))
            .unwrap_err();

        match err {
            DomainError::Validation(errors) => assert!(errors.has_field("postal_code")),
            other => panic!("Expected Validation, got {other:?}"),
        }
        assert_eq!(checkout.status(), CheckoutStatus::Started);
    }

    #[test]
    fn inactive_or_unknown_method_is_rejected() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        let inactive = ShippingMethod {
            active: false,
            ..ground()
        };

        for method in [None, Some(inactive)] {
            let err = checkout
                .execute(&CheckoutCommand::SubmitShippingInfo(SubmitShippingInfo {
                    checkout_id: checkout.id_typed(),
                    address: address(),
                    shipping_method_id: ShippingMethodId::new("ground"),
                    shipping_method: method,
                    occurred_at: test_time(),
                }))
                .unwrap_err();
            assert_eq!(err.reason(), Some(RejectionReason::ShippingMethodUnavailable));
        }
        assert_eq!(checkout.status(), CheckoutStatus::Started);
    }

    #[test]
    fn payment_before_shipping_is_invalid_state() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        let err = submit_payment(&mut checkout).unwrap_err();
        assert_eq!(err.reason(), Some(RejectionReason::InvalidState));
    }

    #[test]
    fn payment_copies_shipping_into_billing() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();
        submit_payment(&mut checkout).unwrap();

        assert_eq!(checkout.status(), CheckoutStatus::Review);
        assert_eq!(checkout.billing_address(), checkout.shipping_address());
        assert_eq!(checkout.payment_method(), Some("credit_card"));
    }

    #[test]
    fn resubmitting_shipping_from_review_returns_to_payment() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();
        submit_payment(&mut checkout).unwrap();

        let events = submit_shipping(&mut checkout).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(checkout.status(), CheckoutStatus::PaymentInfo);
    }

    #[test]
    fn complete_from_payment_info_is_invalid_state() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();
        let version = checkout.version();

        let err = complete(&mut checkout, &cart, test_time()).unwrap_err();
        assert_eq!(err.reason(), Some(RejectionReason::InvalidState));
        assert_eq!(checkout.status(), CheckoutStatus::PaymentInfo);
        assert_eq!(checkout.version(), version);
    }

    #[test]
    fn complete_rejects_cart_changed_since_review() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();
        submit_payment(&mut checkout).unwrap();
        let version = checkout.version();
        let reviewed = checkout.totals().clone();

        let mut grown = cart.clone();
        grown.items[0].quantity = 2;
        let err = complete(&mut checkout, &grown, test_time()).unwrap_err();

        assert_eq!(err.reason(), Some(RejectionReason::CartChanged));
        assert_eq!(checkout.status(), CheckoutStatus::Review);
        assert_eq!(checkout.version(), version);
        assert_eq!(checkout.totals(), &reviewed);
    }

    #[test]
    fn resubmitting_payment_refreshes_the_review() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();
        submit_payment(&mut checkout).unwrap();

        let mut fresh = cart_snapshot(&[(3000, 2)]);
        fresh.cart_id = cart.cart_id;
        submit_payment_with(&mut checkout, Some(&fresh)).unwrap();
        assert_eq!(checkout.status(), CheckoutStatus::Review);
        assert_eq!(checkout.totals().subtotal, Money::from_major(60));

        complete(&mut checkout, &fresh, test_time()).unwrap();

        assert_eq!(checkout.status(), CheckoutStatus::Completed);
        assert!(checkout.completed_at().is_some());
        assert!(checkout.order_id().is_some());
        assert_eq!(checkout.totals().subtotal, Money::from_major(60));
        assert_eq!(checkout.totals().shipping_amount, Money::from_major(9));
    }

    #[test]
    fn completed_checkout_cannot_complete_again() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();
        submit_payment(&mut checkout).unwrap();
        complete(&mut checkout, &cart, test_time()).unwrap();

        let err = complete(&mut checkout, &cart, test_time()).unwrap_err();
        assert_eq!(err.reason(), Some(RejectionReason::InvalidState));
    }

    #[test]
    fn expired_session_cannot_complete() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();
        submit_payment(&mut checkout).unwrap();

        let err = complete(&mut checkout, &cart, test_time() + Duration::hours(3)).unwrap_err();
        assert_eq!(err.reason(), Some(RejectionReason::CheckoutExpired));
        assert_eq!(checkout.status(), CheckoutStatus::Review);
        assert!(!checkout.is_open(test_time() + Duration::hours(3)));
    }

    #[test]
    fn cancel_from_any_open_state_but_not_twice() {
        let cart = cart_snapshot(&[(3000, 1)]);
        let mut checkout = started(&cart);
        submit_shipping(&mut checkout).unwrap();

        let cancel = CheckoutCommand::CancelCheckout(CancelCheckout {
            checkout_id: checkout.id_typed(),
            reason: CancelReason::Abandoned,
            occurred_at: test_time(),
        });
        checkout.execute(&cancel).unwrap();
        assert_eq!(checkout.status(), CheckoutStatus::Cancelled);
        assert_eq!(checkout.cancel_reason(), Some(CancelReason::Abandoned));

        let err = checkout.handle(&cancel).unwrap_err();
        assert_eq!(err.reason(), Some(RejectionReason::InvalidState));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CheckoutStatus::PaymentInfo).unwrap(),
            "\"payment_info\""
        );
    }
}
