//! Application Services
//!
//! Long-running coordination built on the ports.

mod order_lifecycle;

pub use order_lifecycle::{
    DEFAULT_UPDATE_CAPACITY, OrderLifecycleCoordinator, OrderUpdate, ReconciliationReport,
    VenueLink,
};
