//! Shared Domain Types
//!
//! Value objects shared across bounded contexts.

pub mod value_objects;

pub use value_objects::{
    ClOrdId, SessionCredentials, SharedCredentials, Venue, VenueOrderId, normalize_epoch_micros,
    now_micros, now_millis, parse_epoch_micros, shared_credentials,
};
