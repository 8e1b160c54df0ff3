//! Catalog collaborator contracts.
//!
//! Products and shipping methods are owned by the surrounding application. This
//! crate only describes the shape the pricing core reads and the lookup seams it
//! calls through.

pub mod product;
pub mod shipping;

pub use product::{Product, ProductCatalog, ProductId, ProductStatus};
pub use shipping::{ShippingMethod, ShippingMethodId, ShippingMethods};
