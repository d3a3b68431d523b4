//! Order Gateway Port (Driven Port)
//!
//! Outbound order entry for one venue. Implementations only transmit; the
//! venue's answer comes back as canonical order events on the session.

use async_trait::async_trait;

use crate::domain::order_execution::{Order, OrderRequest};
use crate::domain::shared::Venue;
use crate::error::GatewayResult;

/// Port for sending order instructions to a venue.
#[async_trait]
pub trait OrderGatewayPort: Send + Sync {
    /// Venue served.
    fn venue(&self) -> Venue;

    /// Transmit a new order.
    async fn send_order(&self, request: &OrderRequest) -> GatewayResult<()>;

    /// Transmit a cancel for a live order.
    async fn cancel_order(&self, order: &Order) -> GatewayResult<()>;

    /// Transmit an amend of quantity and/or price.
    async fn modify_order(
        &self,
        order: &Order,
        new_quantity: f64,
        new_price: Option<f64>,
    ) -> GatewayResult<()>;
}
