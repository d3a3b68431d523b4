//! Shared Value Objects
//!
//! Immutable domain types used across bounded contexts.

mod credentials;
mod identifiers;
pub mod timestamp;
mod venue;

pub use credentials::{SessionCredentials, SharedCredentials, shared_credentials};
pub use identifiers::{ClOrdId, VenueOrderId};
pub use timestamp::{normalize_epoch_micros, now_micros, now_millis, parse_epoch_micros};
pub use venue::Venue;
