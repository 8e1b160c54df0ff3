//! Infrastructure layer: event store, dispatcher, lookup indexes, config and the
//! storefront application services.

pub mod catalog;
pub mod clock;
pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod read_model;
pub mod storefront;


pub use catalog::InMemoryCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, StoreConfig};
pub use storefront::{CouponApplication, InMemoryStorefront, Shopper, Storefront, SweepReport};
