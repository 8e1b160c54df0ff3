//! Store configuration.
//!
//! Defaults match a US storefront: USD, 8% tax, the $100/$50 shipping tiers,
//! 7-day guest carts, 30-day user carts and 2-hour checkout sessions. Every
//! value can be overridden from `STOREFRONT_*` environment variables.

use std::str::FromStr;

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use storefront_carts::PricingPolicy;
use storefront_core::{CurrencyCode, Money};

/// Upper bounds for the lifetime settings.
pub const MAX_CART_DAYS: i64 = 3_650;
pub const MAX_CHECKOUT_TTL_MINUTES: i64 = 7 * 24 * 60;
pub const MAX_EMPTY_CART_IDLE_HOURS: i64 = 365 * 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub currency: CurrencyCode,
    pub pricing: PricingPolicy,
    pub guest_cart_days: i64,
    pub user_cart_days: i64,
    pub checkout_ttl_minutes: i64,
    /// Empty guest carts untouched for this long are swept.
    pub empty_cart_idle_hours: i64,
    pub max_conflict_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::usd(),
            pricing: PricingPolicy::default(),
            guest_cart_days: 7,
            user_cart_days: 30,
            checkout_ttl_minutes: 120,
            empty_cart_idle_hours: 24,
            max_conflict_retries: 3,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by whatever `STOREFRONT_*` variables are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`StoreConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let read = |var: &'static str| lookup(var).map(|v| (var, v.trim().to_string()));

        if let Some((var, value)) = read("STOREFRONT_CURRENCY") {
            config.currency = CurrencyCode::parse(&value)
                .map_err(|e| ConfigError::invalid(var, &value, e.to_string()))?;
        }
        if let Some((var, value)) = read("STOREFRONT_TAX_RATE") {
            let rate = parse_decimal(var, &value)?;
            if rate < Decimal::ZERO || rate >= Decimal::ONE {
                return Err(ConfigError::invalid(var, &value, "must be in [0, 1)"));
            }
            config.pricing.tax_rate = rate;
        }
        if let Some((var, value)) = read("STOREFRONT_FREE_SHIPPING_THRESHOLD") {
            config.pricing.free_shipping_threshold = parse_money(var, &value)?;
        }
        if let Some((var, value)) = read("STOREFRONT_REDUCED_SHIPPING_THRESHOLD") {
            config.pricing.reduced_shipping_threshold = parse_money(var, &value)?;
        }
        if let Some((var, value)) = read("STOREFRONT_REDUCED_SHIPPING_RATE") {
            config.pricing.reduced_shipping_rate = parse_money(var, &value)?;
        }
        if let Some((var, value)) = read("STOREFRONT_STANDARD_SHIPPING_RATE") {
            config.pricing.standard_shipping_rate = parse_money(var, &value)?;
        }
        if let Some((var, value)) = read("STOREFRONT_LEGACY_COUPONS") {
            config.pricing.legacy_coupon_codes = parse_bool(var, &value)?;
        }
        if let Some((var, value)) = read("STOREFRONT_GUEST_CART_DAYS") {
            config.guest_cart_days = parse_bounded(var, &value, MAX_CART_DAYS)?;
        }
        if let Some((var, value)) = read("STOREFRONT_USER_CART_DAYS") {
            config.user_cart_days = parse_bounded(var, &value, MAX_CART_DAYS)?;
        }
        if let Some((var, value)) = read("STOREFRONT_CHECKOUT_TTL_MINUTES") {
            config.checkout_ttl_minutes = parse_bounded(var, &value, MAX_CHECKOUT_TTL_MINUTES)?;
        }
        if let Some((var, value)) = read("STOREFRONT_EMPTY_CART_IDLE_HOURS") {
            config.empty_cart_idle_hours = parse_bounded(var, &value, MAX_EMPTY_CART_IDLE_HOURS)?;
        }
        if let Some((var, value)) = read("STOREFRONT_MAX_RETRIES") {
            config.max_conflict_retries = value
                .parse()
                .map_err(|e| ConfigError::invalid(var, &value, format!("{e}")))?;
        }

        Ok(config)
    }

    // Clamped: deserialized documents bypass the bounds in `from_lookup`.
    pub fn guest_cart_ttl(&self) -> Duration {
        Duration::days(self.guest_cart_days.clamp(1, MAX_CART_DAYS))
    }

    pub fn user_cart_ttl(&self) -> Duration {
        Duration::days(self.user_cart_days.clamp(1, MAX_CART_DAYS))
    }

    pub fn checkout_ttl(&self) -> Duration {
        Duration::minutes(self.checkout_ttl_minutes.clamp(1, MAX_CHECKOUT_TTL_MINUTES))
    }

    pub fn empty_cart_idle(&self) -> Duration {
        Duration::hours(self.empty_cart_idle_hours.clamp(1, MAX_EMPTY_CART_IDLE_HOURS))
    }
}

fn parse_decimal(var: &'static str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value).map_err(|e| ConfigError::invalid(var, value, e.to_string()))
}

fn parse_money(var: &'static str, value: &str) -> Result<Money, ConfigError> {
    let amount = parse_decimal(var, value)?;
    if amount < Decimal::ZERO {
        return Err(ConfigError::invalid(var, value, "must not be negative"));
    }
    Ok(Money::new(amount))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, value, "expected true or false")),
    }
}

fn parse_bounded(var: &'static str, value: &str, max: i64) -> Result<i64, ConfigError> {
    match value.parse::<i64>() {
        Ok(n) if n <= 0 => Err(ConfigError::invalid(var, value, "must be positive")),
        Ok(n) if n > max => Err(ConfigError::invalid(var, value, format!("must be at most {max}"))),
        Ok(n) => Ok(n),
        Err(e) => Err(ConfigError::invalid(var, value, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.checkout_ttl(), Duration::hours(2));
        assert_eq!(config.guest_cart_ttl(), Duration::days(7));
    }

    #[test]
    fn overrides_are_applied() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("STOREFRONT_CURRENCY", "eur"),
            ("STOREFRONT_TAX_RATE", "0.20"),
            ("STOREFRONT_FREE_SHIPPING_THRESHOLD", "75"),
            ("STOREFRONT_LEGACY_COUPONS", "off"),
            ("STOREFRONT_CHECKOUT_TTL_MINUTES", "30"),
        ]))
        .unwrap();

        assert_eq!(config.currency.as_str(), "EUR");
        assert_eq!(config.pricing.tax_rate, Decimal::new(20, 2));
        assert_eq!(config.pricing.free_shipping_threshold, Money::from_major(75));
        assert!(!config.pricing.legacy_coupon_codes);
        assert_eq!(config.checkout_ttl(), Duration::minutes(30));
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = StoreConfig::from_lookup(lookup(&[("STOREFRONT_TAX_RATE", "eight")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "STOREFRONT_TAX_RATE", .. }
        ));

        let err =
            StoreConfig::from_lookup(lookup(&[("STOREFRONT_GUEST_CART_DAYS", "0")])).unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn lifetimes_beyond_the_bounds_are_refused() {
        let err = StoreConfig::from_lookup(lookup(&[("STOREFRONT_GUEST_CART_DAYS", "200000000")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "STOREFRONT_GUEST_CART_DAYS", .. }
        ));
        assert!(err.to_string().contains("must be at most 3650"));

        for var in [
            "STOREFRONT_USER_CART_DAYS",
            "STOREFRONT_CHECKOUT_TTL_MINUTES",
            "STOREFRONT_EMPTY_CART_IDLE_HOURS",
        ] {
            assert!(StoreConfig::from_lookup(lookup(&[(var, "9223372036854775807")])).is_err());
        }

        let config =
            StoreConfig::from_lookup(lookup(&[("STOREFRONT_USER_CART_DAYS", "3650")])).unwrap();
        assert_eq!(config.user_cart_ttl(), Duration::days(3_650));
    }

    #[test]
    fn deserialized_lifetimes_are_clamped() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"guest_cart_days":200000000,"checkout_ttl_minutes":-5}"#)
                .unwrap();
        assert_eq!(config.guest_cart_ttl(), Duration::days(MAX_CART_DAYS));
        assert_eq!(config.checkout_ttl(), Duration::minutes(1));
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"currency":"GBP","pricing":{"legacy_coupon_codes":false}}"#)
                .unwrap();
        assert_eq!(config.currency.as_str(), "GBP");
        assert_eq!(config.pricing.tax_rate, Decimal::new(8, 2));
        assert_eq!(config.user_cart_days, 30);
    }
}
