//! Order Execution Bounded Context
//!
//! Order lifecycle from submission to a terminal state.
//!
//! # Key Concepts
//!
//! - **Order Aggregate**: the immutable request plus mutable fill accounting
//! - **State Machine**: the only way an order changes state

pub mod aggregate;
pub mod errors;
pub mod services;
pub mod value_objects;

pub use aggregate::{FillUpdate, Order, OrderRequest, OrderStateInfo, QTY_EPSILON};
pub use errors::OrderError;
pub use services::{OrderStateMachine, Transition};
pub use value_objects::{OrderEventKind, OrderSide, OrderState, OrderType, PositionSide};
