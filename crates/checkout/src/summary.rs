use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storefront_carts::{CartLineSummary, FormattedTotals};
use storefront_core::{CurrencyCode, Money};

use crate::address::Address;
use crate::checkout::{Checkout, CheckoutId, CheckoutStatus};

/// What the web layer renders on each checkout step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSummary {
    pub checkout_id: CheckoutId,
    pub status: CheckoutStatus,
    pub currency: CurrencyCode,
    pub item_count: u32,
    pub unique_item_count: usize,
    pub subtotal: Money,
    pub tax_amount: Money,
    pub shipping_amount: Money,
    pub discount_amount: Money,
    pub total: Money,
    pub formatted: FormattedTotals,
    pub coupon_code: Option<String>,
    pub items: Vec<CartLineSummary>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub shipping_method: Option<String>,
    pub payment_method: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CheckoutSummary {
    pub fn from_checkout(checkout: &Checkout) -> Self {
        let totals = checkout.totals();
        let currency = checkout
            .cart()
            .map(|cart| cart.currency.clone())
            .unwrap_or_default();
        let items = checkout.cart().map(|cart| cart.items.as_slice()).unwrap_or_default();

        Self {
            checkout_id: checkout.id_typed(),
            status: checkout.status(),
            item_count: items.iter().map(|item| item.quantity).sum(),
            unique_item_count: items.len(),
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            shipping_amount: totals.shipping_amount,
            discount_amount: totals.discount_amount,
            total: totals.total,
            formatted: FormattedTotals::new(totals, &currency),
            coupon_code: checkout.coupon_code().map(str::to_string),
            items: items
                .iter()
                .map(|item| CartLineSummary::new(item, &currency))
                .collect(),
            shipping_address: checkout.shipping_address().cloned(),
            billing_address: checkout.billing_address().cloned(),
            shipping_method: checkout.shipping_method().map(|method| method.name.clone()),
            payment_method: checkout.payment_method().map(str::to_string),
            expires_at: checkout.expires_at(),
            currency,
        }
    }
}

impl Checkout {
    pub fn summary(&self) -> CheckoutSummary {
        CheckoutSummary::from_checkout(self)
    }
}
