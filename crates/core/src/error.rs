//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Storage and transport failures are
/// modelled by the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input had the wrong shape or range. Carries field-level messages.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// A business rule refused the operation (inventory, coupons, step gates).
    #[error("{message}")]
    Rejected {
        reason: RejectionReason,
        message: String,
    },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    /// Single field-level validation failure.
    pub fn validation(field: impl Into<String>, msg: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.push(field, msg);
        Self::Validation(errors)
    }

    pub fn rejected(reason: RejectionReason, msg: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            message: msg.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Machine-readable reason for business-rule rejections.
    pub fn reason(&self) -> Option<RejectionReason> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Machine-distinguishable reason for a business-rule rejection.
///
/// The web layer switches on these to pick a redirect or message; the `message`
/// on [`DomainError::Rejected`] is the human-readable counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Product is inactive (or otherwise cannot be sold).
    ProductUnavailable,
    /// Requested quantity exceeds tracked stock; `max_addable` is what would still fit.
    InsufficientInventory { max_addable: u32 },
    CouponNotFound,
    CouponInactive,
    CouponExpired,
    CouponNotStarted,
    CouponUsageExceeded,
    CouponBelowMinimum,
    /// Cart is converted, abandoned or discarded.
    CartInactive,
    EmptyCart,
    /// Operation not allowed in the current checkout step.
    InvalidState,
    CheckoutExpired,
    /// Cart lines or coupon differ from what the shopper reviewed.
    CartChanged,
    ShippingMethodUnavailable,
}

impl RejectionReason {
    /// Stable snake_case code (matches the serialized `code` tag).
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProductUnavailable => "product_unavailable",
            Self::InsufficientInventory { .. } => "insufficient_inventory",
            Self::CouponNotFound => "coupon_not_found",
            Self::CouponInactive => "coupon_inactive",
            Self::CouponExpired => "coupon_expired",
            Self::CouponNotStarted => "coupon_not_started",
            Self::CouponUsageExceeded => "coupon_usage_exceeded",
            Self::CouponBelowMinimum => "coupon_below_minimum",
            Self::CartInactive => "cart_inactive",
            Self::EmptyCart => "empty_cart",
            Self::InvalidState => "invalid_state",
            Self::CheckoutExpired => "checkout_expired",
            Self::CartChanged => "cart_changed",
            Self::ShippingMethodUnavailable => "shipping_method_unavailable",
        }
    }
}

impl core::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// One field-level validation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Collected field-level validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, msg: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: msg.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Messages recorded against one field.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was collected, otherwise a `DomainError::Validation`.
    pub fn into_result(self) -> DomainResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DomainError::Validation(self))
        }
    }
}

impl core::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (idx, e) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} {}", e.field, e.message)?;
        }
        Ok(())
    }
}
