//! Order Execution Value Objects
//!
//! Immutable types for order management.

mod order_side;
mod order_state;
mod order_type;

pub use order_side::{OrderSide, PositionSide};
pub use order_state::{OrderEventKind, OrderState};
pub use order_type::OrderType;
