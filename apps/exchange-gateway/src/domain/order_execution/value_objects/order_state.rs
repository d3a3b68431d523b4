//! Order lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an order.
///
/// `PENDING → ACKNOWLEDGED → PARTIALLY_FILLED → FILLED`, with any open state
/// also able to end in `CANCELLED`, `REJECTED` or `EXPIRED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Sent (or about to be sent), not yet acknowledged by the venue.
    Pending,
    /// Resting at the venue.
    Acknowledged,
    /// Some quantity executed.
    PartiallyFilled,
    /// Entire quantity executed.
    Filled,
    /// Cancelled by request or by the venue.
    Cancelled,
    /// Refused by the venue or by the gateway.
    Rejected,
    /// Lapsed per its time-in-force.
    Expired,
}

impl OrderState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Acknowledged,
        Self::PartiallyFilled,
        Self::Filled,
        Self::Cancelled,
        Self::Rejected,
        Self::Expired,
    ];

    /// Returns true if no further transitions are accepted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Expired
        )
    }

    /// Returns true if the order may still trade or be cancelled.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized kind of a venue order update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventKind {
    /// Venue accepted the order.
    Ack,
    /// Some or all quantity executed.
    Fill,
    /// Order cancelled or expired.
    Cancel,
    /// Venue refused the order.
    Reject,
}

impl OrderEventKind {
    /// Wire name of the kind, used as metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::Fill => "FILL",
            Self::Cancel => "CANCEL",
            Self::Reject => "REJECT",
        }
    }
}

impl fmt::Display for OrderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
