//! Venue Protocol Adapters
//!
//! Each venue speaks its own REST/WebSocket dialect. An adapter translates
//! that dialect into [`CanonicalEvent`]s on the way in and builds signed
//! requests, subscription envelopes and order envelopes on the way out.
//!
//! The set of venues is closed, so dispatch goes through the
//! [`VenueAdapter`] enum rather than trait objects.

mod binance;
mod deribit;
mod grvt;
mod order_gateway;
mod signing;
mod wire;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::{ChannelKind, RestQuery, SnapshotKind, SnapshotProtocol};
use crate::domain::canonical::{
    AccountBalance, CanonicalEvent, OrderBookSnapshot, OrderEvent, PositionUpdate, Trade,
};
use crate::domain::order_execution::{Order, OrderRequest};
use crate::domain::shared::{SessionCredentials, Venue};
use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

pub use binance::BinanceAdapter;
pub use deribit::DeribitAdapter;
pub use grvt::{GrvtAdapter, GrvtEnvelope};
pub use order_gateway::VenueOrderGateway;
pub use signing::{encode_query, hmac_sha256_hex, percent_encode, sign_query};
pub use wire::ParseError;

/// Direction of a subscription change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Start receiving a channel.
    Subscribe,
    /// Stop receiving a channel.
    Unsubscribe,
}

/// Logical stream a caller can ask an adapter to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Public trades.
    Trades,
    /// Order book.
    OrderBook,
    /// Own order updates.
    Orders,
    /// Own positions.
    Positions,
    /// Own balances.
    Balances,
}

impl StreamKind {
    /// Whether the stream carries account data.
    #[must_use]
    pub const fn is_private(&self) -> bool {
        matches!(self, Self::Orders | Self::Positions | Self::Balances)
    }
}

/// Where an order envelope must go.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRequest {
    /// Text frame on the private WebSocket session.
    Ws(String),
    /// REST call.
    Rest(RestQuery),
}

/// Request material handed to [`ExchangeProtocolAdapter::build_auth`].
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    /// Query being sent.
    pub query: &'a RestQuery,
    /// Serialized body, when present.
    pub body: Option<&'a str>,
    /// Wall-clock time in milliseconds.
    pub timestamp_ms: i64,
    /// Random nonce for venues that sign one.
    pub nonce: &'a str,
}

/// Headers, final query string and body to put on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedRequest {
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Encoded query string without the leading `?`.
    pub query: String,
    /// Body, when present.
    pub body: Option<String>,
}

/// Capability contract every venue adapter satisfies.
pub trait ExchangeProtocolAdapter: Send + Sync {
    /// Venue served.
    fn venue(&self) -> Venue;

    /// Parse one order update.
    fn parse_order_event(&self, raw: &Value) -> Result<OrderEvent, ParseError>;

    /// Parse one position; `None` for flat positions.
    fn parse_position(&self, raw: &Value) -> Result<Option<PositionUpdate>, ParseError>;

    /// Parse one balance; `None` for empty balances.
    fn parse_balance(&self, raw: &Value) -> Result<Option<AccountBalance>, ParseError>;

    /// Parse one public trade.
    fn parse_trade(&self, raw: &Value) -> Result<Trade, ParseError>;

    /// Parse one order book message.
    fn parse_orderbook(&self, raw: &Value) -> Result<OrderBookSnapshot, ParseError>;

    /// Route a decoded frame to the matching parsers.
    fn route(&self, channel: ChannelKind, raw: &Value) -> Result<Vec<CanonicalEvent>, ParseError>;

    /// Decode a text frame. Malformed frames are logged, counted and dropped.
    fn decode(&self, channel: ChannelKind, text: &str) -> Vec<CanonicalEvent> {
        let result = serde_json::from_str::<Value>(text)
            .map_err(ParseError::from)
            .and_then(|raw| self.route(channel, &raw));
        match result {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(
                    venue = %self.venue(),
                    channel = %channel,
                    error = %e,
                    "Dropping malformed message"
                );
                metrics::record_malformed_message(self.venue().as_str());
                Vec::new()
            }
        }
    }

    /// Sign a REST request.
    fn build_auth(
        &self,
        credentials: &SessionCredentials,
        request: &AuthRequest<'_>,
    ) -> GatewayResult<SignedRequest>;

    /// Extra headers for the WebSocket upgrade.
    fn handshake_headers(
        &self,
        _credentials: &SessionCredentials,
        _channel: ChannelKind,
    ) -> Vec<(String, String)> {
        Vec::new()
    }

    /// In-band login sent right after the handshake.
    fn login_frame(
        &self,
        _credentials: &SessionCredentials,
        _channel: ChannelKind,
        _id: u64,
    ) -> Option<String> {
        None
    }

    /// Venue channel name for a stream, `None` when the venue pushes it
    /// without a subscription.
    fn subscription_channel(&self, stream: StreamKind, symbol: &str) -> Option<String>;

    /// Subscribe envelope for one stream and symbol.
    fn build_subscription(&self, stream: StreamKind, symbol: &str, id: u64) -> Option<String> {
        let channel = self.subscription_channel(stream, symbol)?;
        self.build_subscription_request(&[channel], SubscriptionAction::Subscribe, id)
            .into_iter()
            .next()
    }

    /// Envelopes changing a set of venue channels.
    fn build_subscription_request(
        &self,
        channels: &[String],
        action: SubscriptionAction,
        id: u64,
    ) -> Vec<String>;

    /// Application-level keepalive; `None` means a PING frame.
    fn heartbeat(&self, _id: u64) -> Option<String> {
        None
    }

    /// Reply to a venue heartbeat request, if `text` is one.
    fn heartbeat_reply(&self, _text: &str) -> Option<String> {
        None
    }

    /// In-band session renewal.
    fn session_refresh_frame(&self, _credentials: &SessionCredentials, _id: u64) -> Option<String> {
        None
    }

    /// REST session renewal.
    fn session_refresh_query(&self, _credentials: &SessionCredentials) -> Option<RestQuery> {
        None
    }

    /// REST call opening a private user stream.
    fn user_stream_query(&self) -> Option<RestQuery> {
        None
    }

    /// Envelope placing an order.
    fn build_order(&self, request: &OrderRequest, id: u64) -> GatewayResult<OutboundRequest>;

    /// Envelope cancelling an order.
    fn build_cancel(&self, order: &Order, id: u64) -> GatewayResult<OutboundRequest>;

    /// Envelope amending an order.
    fn build_modify(
        &self,
        order: &Order,
        new_quantity: f64,
        new_price: Option<f64>,
        id: u64,
    ) -> GatewayResult<OutboundRequest>;

    /// REST query for a reconciliation snapshot.
    fn reconciliation_query(&self, kind: SnapshotKind) -> RestQuery;

    /// Parse a reconciliation response body.
    fn parse_snapshot(&self, kind: SnapshotKind, body: &Value)
    -> Result<Vec<CanonicalEvent>, ParseError>;
}

/// Closed set of supported venues.
#[derive(Debug)]
pub enum VenueAdapter {
    /// Binance USDⓈ-M futures.
    Binance(BinanceAdapter),
    /// Deribit.
    Deribit(DeribitAdapter),
    /// GRVT.
    Grvt(GrvtAdapter),
}

impl From<BinanceAdapter> for VenueAdapter {
    fn from(adapter: BinanceAdapter) -> Self {
        Self::Binance(adapter)
    }
}

impl From<DeribitAdapter> for VenueAdapter {
    fn from(adapter: DeribitAdapter) -> Self {
        Self::Deribit(adapter)
    }
}

impl From<GrvtAdapter> for VenueAdapter {
    fn from(adapter: GrvtAdapter) -> Self {
        Self::Grvt(adapter)
    }
}

macro_rules! dispatch {
    ($self:ident, $adapter:ident => $call:expr) => {
        match $self {
            VenueAdapter::Binance($adapter) => $call,
            VenueAdapter::Deribit($adapter) => $call,
            VenueAdapter::Grvt($adapter) => $call,
        }
    };
}

impl ExchangeProtocolAdapter for VenueAdapter {
    fn venue(&self) -> Venue {
        dispatch!(self, a => a.venue())
    }

    fn parse_order_event(&self, raw: &Value) -> Result<OrderEvent, ParseError> {
        dispatch!(self, a => a.parse_order_event(raw))
    }

    fn parse_position(&self, raw: &Value) -> Result<Option<PositionUpdate>, ParseError> {
        dispatch!(self, a => a.parse_position(raw))
    }

    fn parse_balance(&self, raw: &Value) -> Result<Option<AccountBalance>, ParseError> {
        dispatch!(self, a => a.parse_balance(raw))
    }

    fn parse_trade(&self, raw: &Value) -> Result<Trade, ParseError> {
        dispatch!(self, a => a.parse_trade(raw))
    }

    fn parse_orderbook(&self, raw: &Value) -> Result<OrderBookSnapshot, ParseError> {
        dispatch!(self, a => a.parse_orderbook(raw))
    }

    fn route(&self, channel: ChannelKind, raw: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        dispatch!(self, a => a.route(channel, raw))
    }

    fn decode(&self, channel: ChannelKind, text: &str) -> Vec<CanonicalEvent> {
        dispatch!(self, a => a.decode(channel, text))
    }

    fn build_auth(
        &self,
        credentials: &SessionCredentials,
        request: &AuthRequest<'_>,
    ) -> GatewayResult<SignedRequest> {
        dispatch!(self, a => a.build_auth(credentials, request))
    }

    fn handshake_headers(
        &self,
        credentials: &SessionCredentials,
        channel: ChannelKind,
    ) -> Vec<(String, String)> {
        dispatch!(self, a => a.handshake_headers(credentials, channel))
    }

    fn login_frame(
        &self,
        credentials: &SessionCredentials,
        channel: ChannelKind,
        id: u64,
    ) -> Option<String> {
        dispatch!(self, a => a.login_frame(credentials, channel, id))
    }

    fn subscription_channel(&self, stream: StreamKind, symbol: &str) -> Option<String> {
        dispatch!(self, a => a.subscription_channel(stream, symbol))
    }

    fn build_subscription_request(
        &self,
        channels: &[String],
        action: SubscriptionAction,
        id: u64,
    ) -> Vec<String> {
        dispatch!(self, a => a.build_subscription_request(channels, action, id))
    }

    fn heartbeat(&self, id: u64) -> Option<String> {
        dispatch!(self, a => a.heartbeat(id))
    }

    fn heartbeat_reply(&self, text: &str) -> Option<String> {
        dispatch!(self, a => a.heartbeat_reply(text))
    }

    fn session_refresh_frame(&self, credentials: &SessionCredentials, id: u64) -> Option<String> {
        dispatch!(self, a => a.session_refresh_frame(credentials, id))
    }

    fn session_refresh_query(&self, credentials: &SessionCredentials) -> Option<RestQuery> {
        dispatch!(self, a => a.session_refresh_query(credentials))
    }

    fn user_stream_query(&self) -> Option<RestQuery> {
        dispatch!(self, a => a.user_stream_query())
    }

    fn build_order(&self, request: &OrderRequest, id: u64) -> GatewayResult<OutboundRequest> {
        dispatch!(self, a => a.build_order(request, id))
    }

    fn build_cancel(&self, order: &Order, id: u64) -> GatewayResult<OutboundRequest> {
        dispatch!(self, a => a.build_cancel(order, id))
    }

    fn build_modify(
        &self,
        order: &Order,
        new_quantity: f64,
        new_price: Option<f64>,
        id: u64,
    ) -> GatewayResult<OutboundRequest> {
        dispatch!(self, a => a.build_modify(order, new_quantity, new_price, id))
    }

    fn reconciliation_query(&self, kind: SnapshotKind) -> RestQuery {
        dispatch!(self, a => a.reconciliation_query(kind))
    }

    fn parse_snapshot(
        &self,
        kind: SnapshotKind,
        body: &Value,
    ) -> Result<Vec<CanonicalEvent>, ParseError> {
        dispatch!(self, a => a.parse_snapshot(kind, body))
    }
}

impl SnapshotProtocol for VenueAdapter {
    fn snapshot_query(&self, kind: SnapshotKind) -> RestQuery {
        self.reconciliation_query(kind)
    }

    fn decode_snapshot(&self, kind: SnapshotKind, body: &Value) -> GatewayResult<Vec<CanonicalEvent>> {
        self.parse_snapshot(kind, body).map_err(GatewayError::from)
    }
}

/// Venue-formatted decimal.
pub(crate) fn fmt_decimal(value: f64) -> String {
    let mut text = format!("{value:.8}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.1, "0.1")]
    #[test_case(50000.0, "50000")]
    #[test_case(0.000_000_01, "0.00000001")]
    #[test_case(1.234_567_891, "1.23456789")]
    fn decimals_are_trimmed(value: f64, expected: &str) {
        assert_eq!(fmt_decimal(value), expected);
    }

    #[test]
    fn enum_dispatches_to_variant() {
        let adapters: Vec<VenueAdapter> = vec![
            BinanceAdapter::default().into(),
            DeribitAdapter::default().into(),
            GrvtAdapter::default().into(),
        ];
        let venues: Vec<Venue> = adapters.iter().map(ExchangeProtocolAdapter::venue).collect();
        assert_eq!(venues, vec![Venue::Binance, Venue::Deribit, Venue::Grvt]);
    }

    #[test]
    fn decode_drops_garbage() {
        let adapter = VenueAdapter::from(BinanceAdapter::default());
        assert!(adapter.decode(ChannelKind::Public, "not json").is_empty());
        assert!(adapter.decode(ChannelKind::Public, "{\"e\":\"aggTrade\"}").is_empty());
    }

    #[test]
    fn private_streams() {
        assert!(StreamKind::Orders.is_private());
        assert!(!StreamKind::Trades.is_private());
    }
}
