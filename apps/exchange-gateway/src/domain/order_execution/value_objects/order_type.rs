//! Order type (market or limit).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order type specifying execution behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at best available price.
    Market,
    /// Execute at the specified price or better.
    Limit,
    /// Limit order that must rest on the book.
    PostOnly,
}

impl OrderType {
    /// Returns true if this order type carries a limit price.
    #[must_use]
    pub const fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Limit | Self::PostOnly)
    }

    /// Parse a venue order type string.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            "LIMIT_MAKER" | "POST_ONLY" | "GTX" => Some(Self::PostOnly),
            _ => None,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::PostOnly => write!(f, "POST_ONLY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_type_requires_limit_price() {
        assert!(!OrderType::Market.requires_limit_price());
        assert!(OrderType::Limit.requires_limit_price());
        assert!(OrderType::PostOnly.requires_limit_price());
    }

    #[test]
    fn order_type_from_wire() {
        assert_eq!(OrderType::from_wire("limit"), Some(OrderType::Limit));
        assert_eq!(OrderType::from_wire("LIMIT_MAKER"), Some(OrderType::PostOnly));
        assert_eq!(OrderType::from_wire("STOP"), None);
    }
}
