//! Money and currency value objects.
//!
//! Amounts are exact decimals; rounding to cents always uses midpoint-away-from-zero
//! (`0.005` rounds to `0.01`). Display strings go through `rusty-money` so the
//! currency symbol and separators follow ISO conventions.

use core::iter::Sum;
use core::ops::{Add, AddAssign, Sub};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Non-currency-tagged monetary amount.
///
/// The currency lives on the cart/checkout that owns the amount; see [`CurrencyCode`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// `Money::from_cents(6000)` is `60.00`.
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    pub fn from_major(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Round to two decimal places (midpoint away from zero).
    pub fn round(self) -> Self {
        Self(self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Unit price times quantity (unrounded).
    pub fn times(self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }

    /// Multiply by an arbitrary decimal factor (unrounded).
    pub fn scale(self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    /// Clamp negative amounts to zero.
    pub fn non_negative(self) -> Self {
        if self.0.is_sign_negative() {
            Self::ZERO
        } else {
            self
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }
}

impl ValueObject for Money {}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:.2}", self.round().0)
    }
}

/// ISO 4217 alpha code of a cart/checkout currency (e.g. `USD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(
                "currency",
                "must be a 3-letter ISO code",
            ));
        }
        Ok(Self(code))
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable amount in this currency (`$1,234.50`).
    ///
    /// Falls back to `USD 1234.50`-style output for codes `rusty-money` doesn't know.
    pub fn format(&self, money: Money) -> String {
        let Some(currency) = rusty_money::iso::find(&self.0) else {
            return format!("{} {money}", self.0);
        };

        let exponent = currency.exponent;
        let rounded = money
            .amount()
            .round_dp_with_strategy(exponent, RoundingStrategy::MidpointAwayFromZero);
        let minor = (rounded * Decimal::from(10i64.pow(exponent))).to_i64();

        match minor {
            Some(minor) => rusty_money::Money::from_minor(minor, currency).to_string(),
            None => format!("{} {money}", self.0),
        }
    }
}

impl ValueObject for CurrencyCode {}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::usd()
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
