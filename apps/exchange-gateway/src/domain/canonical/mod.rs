//! Canonical Records
//!
//! Venue-independent representations of everything the adapters decode.
//! All numerics are `f64` and all timestamps are microseconds since epoch.

mod records;

pub use records::{
    AccountBalance, CanonicalEvent, OrderBookSnapshot, OrderEvent, PositionUpdate, PriceLevel,
    Trade, BALANCE_EPSILON, POSITION_EPSILON,
};
