//! Order side (buy or sell).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Parse a venue side string (`BUY`, `buy`, `Bid`, `sell`, `ask`...).
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "buy" | "bid" | "b" => Some(Self::Buy),
            "sell" | "ask" | "s" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Lowercase form used by JSON-RPC venues.
    #[must_use]
    pub const fn as_lower(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    /// Net long.
    Long,
    /// Net short.
    Short,
}

impl PositionSide {
    /// Direction implied by a signed size.
    #[must_use]
    pub fn from_signed(size: f64) -> Self {
        if size < 0.0 { Self::Short } else { Self::Long }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn order_side_from_wire() {
        assert_eq!(OrderSide::from_wire("BUY"), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_wire("sell"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_wire("Ask"), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_wire("hold"), None);
    }

    #[test]
    fn order_side_serde() {
        let json = serde_json::to_string(&OrderSide::Buy).unwrap();
        assert_eq!(json, "\"BUY\"");

        let parsed: OrderSide = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(parsed, OrderSide::Sell);
    }

    #[test]
    fn position_side_from_signed() {
        assert_eq!(PositionSide::from_signed(-0.1), PositionSide::Short);
        assert_eq!(PositionSide::from_signed(0.1), PositionSide::Long);
    }
}
