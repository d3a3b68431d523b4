//! Domain Layer
//!
//! The innermost layer, free of I/O:
//!
//! - [`order_execution`]: order aggregate, lifecycle states and the state machine
//! - [`canonical`]: venue-independent records produced by the protocol adapters
//! - [`shared`]: identifiers, venues and timestamp normalization

pub mod canonical;
pub mod order_execution;
pub mod shared;
