//! Canonical Record Types
//!
//! Orders, trades, books, positions and balances as every venue adapter
//! emits them. Quantities are `f64`, timestamps microseconds since epoch.

use serde::{Deserialize, Serialize};

use crate::domain::order_execution::{FillUpdate, OrderEventKind, OrderSide, PositionSide};
use crate::domain::shared::{ClOrdId, Venue, VenueOrderId};

/// Positions with a smaller absolute size are dropped.
pub const POSITION_EPSILON: f64 = 1e-8;

/// Balances with a smaller absolute wallet amount are dropped.
pub const BALANCE_EPSILON: f64 = 1e-8;

/// A normalized order update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Originating venue.
    pub venue: Venue,
    /// Client order id echoed by the venue.
    pub cl_ord_id: ClOrdId,
    /// Venue order id.
    pub venue_order_id: Option<VenueOrderId>,
    /// Venue symbol.
    pub symbol: String,
    /// Order side, when reported.
    pub side: Option<OrderSide>,
    /// Normalized kind.
    pub kind: OrderEventKind,
    /// Quantity executed by this update.
    pub fill_qty: f64,
    /// Price of this execution.
    pub fill_price: f64,
    /// Cumulative executed quantity, when reported.
    pub cumulative_qty: Option<f64>,
    /// Venue-computed average price, when reported.
    pub avg_price: Option<f64>,
    /// Original order quantity, when reported.
    pub order_qty: Option<f64>,
    /// Original limit price, when reported.
    pub order_price: Option<f64>,
    /// Reject or cancel reason.
    pub reason: Option<String>,
    /// Event time (µs).
    pub timestamp_us: i64,
}

impl OrderEvent {
    /// Minimal event of the given kind; parsers fill in the rest.
    #[must_use]
    pub fn new(
        venue: Venue,
        cl_ord_id: ClOrdId,
        symbol: impl Into<String>,
        kind: OrderEventKind,
        timestamp_us: i64,
    ) -> Self {
        Self {
            venue,
            cl_ord_id,
            venue_order_id: None,
            symbol: symbol.into(),
            side: None,
            kind,
            fill_qty: 0.0,
            fill_price: 0.0,
            cumulative_qty: None,
            avg_price: None,
            order_qty: None,
            order_price: None,
            reason: None,
            timestamp_us,
        }
    }

    /// Fill-related fields of the event.
    #[must_use]
    pub const fn fill(&self) -> FillUpdate {
        FillUpdate {
            fill_qty: self.fill_qty,
            fill_price: self.fill_price,
            cumulative_qty: self.cumulative_qty,
            avg_price: self.avg_price,
        }
    }
}

/// A normalized position. `qty` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    /// Originating venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Position direction.
    pub side: PositionSide,
    /// Absolute size.
    pub qty: f64,
    /// Average entry price.
    pub entry_price: f64,
    /// Unrealized PnL in quote currency.
    pub unrealized_pnl: f64,
    /// Event time (µs).
    pub timestamp_us: i64,
}

impl PositionUpdate {
    /// Build from a signed venue size; `None` when the size is below [`POSITION_EPSILON`].
    #[must_use]
    pub fn from_signed(
        venue: Venue,
        symbol: impl Into<String>,
        signed_qty: f64,
        entry_price: f64,
        unrealized_pnl: f64,
        timestamp_us: i64,
    ) -> Option<Self> {
        if !signed_qty.is_finite() || signed_qty.abs() < POSITION_EPSILON {
            return None;
        }
        Some(Self {
            venue,
            symbol: symbol.into(),
            side: PositionSide::from_signed(signed_qty),
            qty: signed_qty.abs(),
            entry_price,
            unrealized_pnl,
            timestamp_us,
        })
    }

    /// Size with the direction folded back into the sign.
    #[must_use]
    pub fn signed_qty(&self) -> f64 {
        match self.side {
            PositionSide::Long => self.qty,
            PositionSide::Short => -self.qty,
        }
    }
}

/// A normalized account balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Originating venue.
    pub venue: Venue,
    /// Asset or currency code.
    pub asset: String,
    /// Total wallet balance.
    pub wallet: f64,
    /// Amount free for new orders.
    pub available: f64,
    /// Amount reserved by open orders and margin.
    pub locked: f64,
    /// Event time (µs).
    pub timestamp_us: i64,
}

impl AccountBalance {
    /// Build from wallet and available amounts, deriving `locked`.
    ///
    /// `None` when the wallet amount is below [`BALANCE_EPSILON`].
    #[must_use]
    pub fn from_wallet_available(
        venue: Venue,
        asset: impl Into<String>,
        wallet: f64,
        available: f64,
        timestamp_us: i64,
    ) -> Option<Self> {
        if !wallet.is_finite() || wallet.abs() < BALANCE_EPSILON {
            return None;
        }
        Some(Self {
            venue,
            asset: asset.into(),
            wallet,
            available,
            locked: wallet - available,
            timestamp_us,
        })
    }
}

/// A public trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Originating venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Venue trade id.
    pub trade_id: String,
    /// Execution price.
    pub price: f64,
    /// Execution size.
    pub qty: f64,
    /// Aggressor side, when reported.
    pub side: Option<OrderSide>,
    /// Trade time (µs).
    pub timestamp_us: i64,
}

/// One price level of a book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Level price.
    pub price: f64,
    /// Aggregate size at the level; zero means removed.
    pub qty: f64,
}

/// An order book view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    /// Originating venue.
    pub venue: Venue,
    /// Venue symbol.
    pub symbol: String,
    /// Bids, best first.
    pub bids: Vec<PriceLevel>,
    /// Asks, best first.
    pub asks: Vec<PriceLevel>,
    /// Venue sequence / update id.
    pub sequence: Option<u64>,
    /// Book time (µs).
    pub timestamp_us: i64,
}

impl OrderBookSnapshot {
    /// Highest bid.
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    /// Lowest ask.
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Midpoint of the best bid and ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(f64::midpoint(bid.price, ask.price)),
            _ => None,
        }
    }
}

/// Everything an adapter can emit, as handed to the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    /// Order lifecycle update.
    Order(OrderEvent),
    /// Position change.
    Position(PositionUpdate),
    /// Balance change.
    Balance(AccountBalance),
    /// Public trade.
    Trade(Trade),
    /// Order book update.
    OrderBook(OrderBookSnapshot),
}

impl CanonicalEvent {
    /// Originating venue.
    #[must_use]
    pub const fn venue(&self) -> Venue {
        match self {
            Self::Order(e) => e.venue,
            Self::Position(e) => e.venue,
            Self::Balance(e) => e.venue,
            Self::Trade(e) => e.venue,
            Self::OrderBook(e) => e.venue,
        }
    }

    /// Event time (µs).
    #[must_use]
    pub const fn timestamp_us(&self) -> i64 {
        match self {
            Self::Order(e) => e.timestamp_us,
            Self::Position(e) => e.timestamp_us,
            Self::Balance(e) => e.timestamp_us,
            Self::Trade(e) => e.timestamp_us,
            Self::OrderBook(e) => e.timestamp_us,
        }
    }

    /// Record type name, used as metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Order(_) => "order",
            Self::Position(_) => "position",
            Self::Balance(_) => "balance",
            Self::Trade(_) => "trade",
            Self::OrderBook(_) => "order_book",
        }
    }

    /// Bus topic, `<kind>.<venue>.<symbol|asset>`.
    #[must_use]
    pub fn topic(&self) -> String {
        let key = match self {
            Self::Order(e) => e.symbol.as_str(),
            Self::Position(e) => e.symbol.as_str(),
            Self::Balance(e) => e.asset.as_str(),
            Self::Trade(e) => e.symbol.as_str(),
            Self::OrderBook(e) => e.symbol.as_str(),
        };
        format!("{}.{}.{}", self.kind(), self.venue(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_position_is_dropped() {
        assert!(PositionUpdate::from_signed(Venue::Binance, "BTCUSDT", 0.000_000_001, 0.0, 0.0, 0).is_none());
        assert!(PositionUpdate::from_signed(Venue::Binance, "BTCUSDT", 0.0, 0.0, 0.0, 0).is_none());
    }

    #[test]
    fn short_position_has_positive_qty() {
        let position =
            PositionUpdate::from_signed(Venue::Deribit, "BTC-PERPETUAL", -0.1, 50_000.0, 1.5, 7)
                .unwrap();
        assert_eq!(position.qty, 0.1);
        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.signed_qty(), -0.1);
    }

    #[test]
    fn balance_derives_locked() {
        let balance =
            AccountBalance::from_wallet_available(Venue::Binance, "USDT", 1_000.0, 750.0, 1)
                .unwrap();
        assert_eq!(balance.locked, 250.0);
        assert!(AccountBalance::from_wallet_available(Venue::Binance, "BNB", 1e-10, 0.0, 1).is_none());
    }

    #[test]
    fn book_helpers() {
        let book = OrderBookSnapshot {
            venue: Venue::Grvt,
            symbol: "BTC_USDT_Perp".into(),
            bids: vec![PriceLevel { price: 99.0, qty: 1.0 }],
            asks: vec![PriceLevel { price: 101.0, qty: 2.0 }],
            sequence: Some(3),
            timestamp_us: 0,
        };
        assert_eq!(book.mid_price(), Some(100.0));
    }

    #[test]
    fn canonical_event_is_tagged() {
        let event = CanonicalEvent::Order(OrderEvent::new(
            Venue::Binance,
            ClOrdId::new("c-1"),
            "BTCUSDT",
            OrderEventKind::Ack,
            1,
        ));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order");
        assert_eq!(json["kind"], "ACK");
        assert_eq!(event.topic(), "order.binance.BTCUSDT");

        let back: CanonicalEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
