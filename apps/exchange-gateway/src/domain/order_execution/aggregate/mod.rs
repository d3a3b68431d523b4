//! Order Aggregate
//!
//! The Order aggregate is the root entity for order lifecycle management.

mod order;

pub use order::{FillUpdate, Order, OrderRequest, OrderStateInfo, QTY_EPSILON};
