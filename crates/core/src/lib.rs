//! `storefront-core` — domain foundation building blocks.
//!
//! Pure domain primitives shared by the cart, coupon and checkout crates:
//! aggregate traits, identifiers, money and the domain error model.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, FieldError, RejectionReason, ValidationErrors};
pub use id::{AggregateId, SessionId, UserId};
pub use money::{CurrencyCode, Money};
pub use value_object::ValueObject;
