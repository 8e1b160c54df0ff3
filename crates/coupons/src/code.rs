use serde::{Deserialize, Serialize};

use storefront_core::{DomainError, DomainResult};

/// Canonical form of a coupon code: trimmed and upper-cased.
///
/// Lookups and storage both go through this, so `" save10 "` and `"SAVE10"` are
/// the same code.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// A normalized, non-blank coupon code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CouponCode(String);

impl CouponCode {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let code = normalize_code(raw);
        if code.is_empty() {
            return Err(DomainError::validation("code", "cannot be blank"));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CouponCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CouponCode> for String {
    fn from(value: CouponCode) -> Self {
        value.0
    }
}

impl core::fmt::Display for CouponCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
