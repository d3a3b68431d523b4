//! Order Aggregate Root
//!
//! [`Order`] is what the caller asked for; [`OrderStateInfo`] is what the
//! venue has told us about it since.

use serde::{Deserialize, Serialize};

use crate::domain::order_execution::errors::OrderError;
use crate::domain::order_execution::value_objects::{OrderSide, OrderState, OrderType};
use crate::domain::shared::{ClOrdId, Venue, VenueOrderId};

/// Quantities closer than this are treated as equal.
pub const QTY_EPSILON: f64 = 1e-8;

/// Command to place a new order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Caller-assigned id.
    pub cl_ord_id: ClOrdId,
    /// Destination venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity in base units.
    pub quantity: f64,
    /// Limit price, ignored for market orders.
    pub price: f64,
}

impl OrderRequest {
    /// Validate the command parameters.
    ///
    /// # Errors
    ///
    /// Returns error if the symbol or id is empty, quantity is not positive,
    /// or a limit order carries a negative or missing price.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.cl_ord_id.as_str().is_empty() {
            return Err(OrderError::invalid("cl_ord_id", "must not be empty"));
        }
        if self.symbol.trim().is_empty() {
            return Err(OrderError::invalid("symbol", "must not be empty"));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(OrderError::invalid("quantity", "must be positive"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(OrderError::invalid("price", "must not be negative"));
        }
        if self.order_type.requires_limit_price() && self.price <= 0.0 {
            return Err(OrderError::invalid(
                "price",
                format!("{} orders require a price", self.order_type),
            ));
        }
        Ok(())
    }
}

/// An order as submitted, plus venue-assigned identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Caller-assigned id.
    pub cl_ord_id: ClOrdId,
    /// Venue id, set once acknowledged.
    pub venue_order_id: Option<VenueOrderId>,
    /// Destination venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Order quantity.
    pub quantity: f64,
    /// Limit price (0 for market orders).
    pub price: f64,
    /// Order type.
    pub order_type: OrderType,
    /// Creation time (µs).
    pub created_at_us: i64,
    /// Last update time (µs).
    pub updated_at_us: i64,
}

impl Order {
    /// Build an order from a validated request.
    #[must_use]
    pub fn from_request(request: OrderRequest, now_us: i64) -> Self {
        Self {
            cl_ord_id: request.cl_ord_id,
            venue_order_id: None,
            venue: request.venue,
            symbol: request.symbol,
            side: request.side,
            quantity: request.quantity,
            price: request.price,
            order_type: request.order_type,
            created_at_us: now_us,
            updated_at_us: now_us,
        }
    }
}

/// Fill information carried by a venue update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FillUpdate {
    /// Quantity executed by this update.
    pub fill_qty: f64,
    /// Price of this execution.
    pub fill_price: f64,
    /// Cumulative executed quantity, when the venue reports it.
    pub cumulative_qty: Option<f64>,
    /// Venue-computed average price, when reported.
    pub avg_price: Option<f64>,
}

/// Authoritative state of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStateInfo {
    /// The order.
    pub order: Order,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Total executed quantity.
    pub filled_qty: f64,
    /// Volume-weighted average fill price.
    pub avg_fill_price: f64,
    /// Outbound attempts beyond the first.
    pub retry_count: u32,
    /// Last change (µs).
    pub last_update_us: i64,
    /// Last venue-provided reason (reject/cancel text).
    pub reason: Option<String>,
}

impl OrderStateInfo {
    /// New entry in `PENDING`.
    #[must_use]
    pub fn new(order: Order) -> Self {
        let last_update_us = order.updated_at_us;
        Self {
            order,
            state: OrderState::Pending,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            retry_count: 0,
            last_update_us,
            reason: None,
        }
    }

    /// Quantity still open.
    #[must_use]
    pub fn remaining_qty(&self) -> f64 {
        (self.order.quantity - self.filled_qty).max(0.0)
    }

    /// Returns true once the executed quantity covers the order quantity.
    #[must_use]
    pub fn is_fully_filled(&self) -> bool {
        self.order.quantity > 0.0 && self.filled_qty + QTY_EPSILON >= self.order.quantity
    }

    /// Fold a fill into `filled_qty` and the average price.
    ///
    /// With a cumulative quantity the increment is `cumulative - filled_qty`,
    /// so a replayed update adds nothing. Returns the applied increment.
    pub fn record_fill(&mut self, fill: FillUpdate, now_us: i64) -> f64 {
        let delta = match fill.cumulative_qty {
            Some(cumulative) => (cumulative - self.filled_qty).max(0.0),
            None => fill.fill_qty.max(0.0),
        };
        if delta <= QTY_EPSILON {
            if let Some(avg) = fill.avg_price.filter(|p| *p > 0.0) {
                self.avg_fill_price = avg;
            }
            return 0.0;
        }

        let new_filled = self.filled_qty + delta;
        self.avg_fill_price = match fill.avg_price.filter(|p| *p > 0.0) {
            Some(avg) => avg,
            None => self
                .avg_fill_price
                .mul_add(self.filled_qty, fill.fill_price * delta)
                / new_filled,
        };
        self.filled_qty = new_filled;
        self.touch(now_us);
        delta
    }

    /// Stamp the last-update time on the entry and its order.
    pub fn touch(&mut self, now_us: i64) {
        self.last_update_us = now_us;
        self.order.updated_at_us = now_us;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OrderRequest {
        OrderRequest {
            cl_ord_id: ClOrdId::new("c-1"),
            venue: Venue::Binance,
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: 0.1,
            price: 50_000.0,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut r = request();
        r.quantity = 0.0;
        assert!(matches!(
            r.validate(),
            Err(OrderError::InvalidParameters { ref field, .. }) if field == "quantity"
        ));

        let mut r = request();
        r.symbol = " ".into();
        assert!(r.validate().is_err());

        let mut r = request();
        r.price = -1.0;
        assert!(r.validate().is_err());

        let mut r = request();
        r.price = 0.0;
        assert!(r.validate().is_err());

        let mut r = request();
        r.order_type = OrderType::Market;
        r.price = 0.0;
        assert!(r.validate().is_ok());
    }

    #[test]
    fn incremental_fills_compute_vwap() {
        let mut info = OrderStateInfo::new(Order::from_request(request(), 1));
        info.record_fill(
            FillUpdate {
                fill_qty: 0.04,
                fill_price: 100.0,
                ..FillUpdate::default()
            },
            2,
        );
        info.record_fill(
            FillUpdate {
                fill_qty: 0.06,
                fill_price: 200.0,
                ..FillUpdate::default()
            },
            3,
        );
        assert!((info.filled_qty - 0.1).abs() < QTY_EPSILON);
        assert!((info.avg_fill_price - 160.0).abs() < 1e-9);
        assert!(info.is_fully_filled());
        assert_eq!(info.last_update_us, 3);
    }

    #[test]
    fn cumulative_fills_are_idempotent() {
        let mut info = OrderStateInfo::new(Order::from_request(request(), 1));
        let fill = FillUpdate {
            fill_qty: 0.05,
            fill_price: 100.0,
            cumulative_qty: Some(0.05),
            avg_price: None,
        };
        assert!((info.record_fill(fill, 2) - 0.05).abs() < QTY_EPSILON);
        assert_eq!(info.record_fill(fill, 3), 0.0);
        assert!((info.filled_qty - 0.05).abs() < QTY_EPSILON);
        assert!((info.remaining_qty() - 0.05).abs() < QTY_EPSILON);
    }

    #[test]
    fn venue_average_takes_precedence() {
        let mut info = OrderStateInfo::new(Order::from_request(request(), 1));
        info.record_fill(
            FillUpdate {
                fill_qty: 0.1,
                fill_price: 101.0,
                cumulative_qty: Some(0.1),
                avg_price: Some(100.5),
            },
            2,
        );
        assert_eq!(info.avg_fill_price, 100.5);
    }
}
