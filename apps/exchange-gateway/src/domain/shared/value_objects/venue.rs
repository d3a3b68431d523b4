//! Supported trading venues.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A trading venue the gateway can connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// Binance (USD-M futures and spot user data).
    Binance,
    /// Deribit (JSON-RPC over WebSocket).
    Deribit,
    /// GRVT (cookie-authenticated JSON-RPC).
    Grvt,
}

impl Venue {
    /// All supported venues.
    pub const ALL: [Self; 3] = [Self::Binance, Self::Deribit, Self::Grvt];

    /// Lowercase name, used as metric label and service key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Deribit => "deribit",
            Self::Grvt => "grvt",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "deribit" => Ok(Self::Deribit),
            "grvt" => Ok(Self::Grvt),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}
