use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_carts::{CartId, CartItem, CartOwner, CartTotals};
use storefront_catalog::{ProductId, ShippingMethodId};
use storefront_core::{
    Aggregate, AggregateId, AggregateRoot, CurrencyCode, DomainError, Money,
};
use storefront_events::Event;

use crate::address::Address;
use crate::checkout::{Checkout, CheckoutId, CheckoutStatus};

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human-readable order number: `ORD-YYYYMMDD-XXXXXXXX`.
///
/// The suffix is the last eight hex digits of the order id, upper-cased.
pub fn order_number(order_id: OrderId, placed_at: DateTime<Utc>) -> String {
    let hex = order_id.0.as_uuid().simple().to_string().to_uppercase();
    let suffix = &hex[hex.len().saturating_sub(8)..];
    format!("ORD-{}-{suffix}", placed_at.format("%Y%m%d"))
}

/// Order status lifecycle. Fulfilment states belong to the order system that
/// consumes placed orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
}

/// Immutable order line copied from a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub total_price: Money,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl OrderLine {
    pub fn from_cart_item(line_no: u32, item: &CartItem) -> Self {
        Self {
            line_no,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            sku: item.sku.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price(),
            options: item.options.clone(),
        }
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    order_number: String,
    checkout_id: Option<CheckoutId>,
    cart_id: Option<CartId>,
    owner: Option<CartOwner>,
    currency: CurrencyCode,
    lines: Vec<OrderLine>,
    totals: CartTotals,
    shipping_address: Option<Address>,
    billing_address: Option<Address>,
    shipping_method_id: Option<ShippingMethodId>,
    shipping_method_name: Option<String>,
    payment_method: Option<String>,
    coupon_code: Option<String>,
    status: OrderStatus,
    placed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            order_number: String::new(),
            checkout_id: None,
            cart_id: None,
            owner: None,
            currency: CurrencyCode::default(),
            lines: Vec::new(),
            totals: CartTotals::default(),
            shipping_address: None,
            billing_address: None,
            shipping_method_id: None,
            shipping_method_name: None,
            payment_method: None,
            coupon_code: None,
            status: OrderStatus::Pending,
            placed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn checkout_id(&self) -> Option<CheckoutId> {
        self.checkout_id
    }

    pub fn cart_id(&self) -> Option<CartId> {
        self.cart_id
    }

    pub fn owner(&self) -> Option<&CartOwner> {
        self.owner.as_ref()
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn totals(&self) -> &CartTotals {
        &self.totals
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref()
    }

    pub fn shipping_method_id(&self) -> Option<&ShippingMethodId> {
        self.shipping_method_id.as_ref()
    }

    pub fn shipping_method_name(&self) -> Option<&str> {
        self.shipping_method_name.as_deref()
    }

    pub fn payment_method(&self) -> Option<&str> {
        self.payment_method.as_deref()
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code.as_deref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub order_number: String,
    pub checkout_id: CheckoutId,
    pub cart_id: CartId,
    pub owner: CartOwner,
    pub currency: CurrencyCode,
    pub lines: Vec<OrderLine>,
    pub totals: CartTotals,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub shipping_method_id: ShippingMethodId,
    pub shipping_method_name: String,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PlaceOrder {
    /// Order data from a checkout that has just been completed.
    pub fn from_checkout(checkout: &Checkout, order_id: OrderId) -> Result<Self, DomainError> {
        if checkout.status() != CheckoutStatus::Completed {
            return Err(DomainError::invariant(
                "orders are only placed from completed checkouts",
            ));
        }
        if checkout.order_id() != Some(order_id.0) {
            return Err(DomainError::invariant("order_id does not match checkout"));
        }

        let missing = |what: &str| DomainError::invariant(format!("completed checkout has no {what}"));
        let cart = checkout.cart().ok_or_else(|| missing("cart"))?;
        let shipping_address = checkout.shipping_address().ok_or_else(|| missing("shipping address"))?;
        let billing_address = checkout.billing_address().ok_or_else(|| missing("billing address"))?;
        let shipping_method = checkout.shipping_method().ok_or_else(|| missing("shipping method"))?;
        let payment_method = checkout.payment_method().ok_or_else(|| missing("payment method"))?;
        let placed_at = checkout.completed_at().ok_or_else(|| missing("completion time"))?;

        let lines = cart
            .items
            .iter()
            .zip(1u32..)
            .map(|(item, line_no)| OrderLine::from_cart_item(line_no, item))
            .collect();

        Ok(Self {
            order_id,
            order_number: order_number(order_id, placed_at),
            checkout_id: checkout.id_typed(),
            cart_id: cart.cart_id,
            owner: cart.owner.clone(),
            currency: cart.currency.clone(),
            lines,
            totals: *checkout.totals(),
            shipping_address: shipping_address.clone(),
            billing_address: billing_address.clone(),
            shipping_method_id: shipping_method.id.clone(),
            shipping_method_name: shipping_method.name.clone(),
            payment_method: payment_method.to_string(),
            coupon_code: cart.coupon_code().map(str::to_string),
            occurred_at: placed_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
}

/// Event: OrderPlaced.
///
/// This is the payload order sinks (mailers, webhooks, fulfilment) consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: String,
    pub checkout_id: CheckoutId,
    pub cart_id: CartId,
    pub owner: CartOwner,
    pub currency: CurrencyCode,
    pub lines: Vec<OrderLine>,
    pub totals: CartTotals,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub shipping_method_id: ShippingMethodId,
    pub shipping_method_name: String,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "checkout.order.placed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_number = e.order_number.clone();
                self.checkout_id = Some(e.checkout_id);
                self.cart_id = Some(e.cart_id);
                self.owner = Some(e.owner.clone());
                self.currency = e.currency.clone();
                self.lines = e.lines.clone();
                self.totals = e.totals;
                self.shipping_address = Some(e.shipping_address.clone());
                self.billing_address = Some(e.billing_address.clone());
                self.shipping_method_id = Some(e.shipping_method_id.clone());
                self.shipping_method_name = Some(e.shipping_method_name.clone());
                self.payment_method = Some(e.payment_method.clone());
                self.coupon_code = e.coupon_code.clone();
                self.status = OrderStatus::Pending;
                self.placed_at = Some(e.occurred_at);
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
        }
    }
}

impl Order {
    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if self.id != cmd.order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("lines", "cannot be empty"));
        }
        if !cmd.totals.is_consistent() {
            return Err(DomainError::invariant("order totals do not add up"));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            checkout_id: cmd.checkout_id,
            cart_id: cmd.cart_id,
            owner: cmd.owner.clone(),
            currency: cmd.currency.clone(),
            lines: cmd.lines.clone(),
            totals: cmd.totals,
            shipping_address: cmd.shipping_address.clone(),
            billing_address: cmd.billing_address.clone(),
            shipping_method_id: cmd.shipping_method_id.clone(),
            shipping_method_name: cmd.shipping_method_name.clone(),
            payment_method: cmd.payment_method.clone(),
            coupon_code: cmd.coupon_code.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
