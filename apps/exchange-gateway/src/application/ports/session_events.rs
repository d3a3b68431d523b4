//! Session Events (Driving Port)
//!
//! What a venue session reports to the core: lifecycle changes and decoded
//! records, delivered in wire order over a bounded channel.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::canonical::CanonicalEvent;
use crate::domain::shared::Venue;
use crate::error::GatewayError;

/// Which side of the venue a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Market data, no credentials.
    Public,
    /// Account data, credentials required.
    Private,
}

impl ChannelKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    /// Whether `connect` must check credentials first.
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        matches!(self, Self::Private)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications a session delivers to its consumer, in wire order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// First connection established.
    Connected {
        /// Venue.
        venue: Venue,
        /// Channel.
        channel: ChannelKind,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Venue.
        venue: Venue,
        /// Channel.
        channel: ChannelKind,
        /// Why.
        error: GatewayError,
    },
    /// Connection restored after a fault; subscriptions were replayed.
    Reconnected {
        /// Venue.
        venue: Venue,
        /// Channel.
        channel: ChannelKind,
        /// Attempts it took.
        attempts: u32,
    },
    /// Connection lost or closed.
    Disconnected {
        /// Venue.
        venue: Venue,
        /// Channel.
        channel: ChannelKind,
        /// Why.
        reason: String,
    },
    /// Reconnect attempts exhausted; the session stays in `Error`.
    GaveUp {
        /// Venue.
        venue: Venue,
        /// Channel.
        channel: ChannelKind,
        /// Attempts made.
        attempts: u32,
    },
    /// A decoded record.
    Record {
        /// Channel it arrived on.
        channel: ChannelKind,
        /// The record.
        event: CanonicalEvent,
        /// Local receive time (µs).
        received_at_us: i64,
    },
}
