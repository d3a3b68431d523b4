//! GRVT.
//!
//! Feeds arrive wrapped as `{stream, selector, sequence_number, feed}`, or
//! in the compact form `{s, s1, n, f}` where every field name is shortened.
//! Both are accepted regardless of the envelope setting, which only decides
//! what this adapter sends. Authentication is a session cookie plus the
//! account id header; the cookie is re-issued from the API key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::wire::{
    ParseError, as_f64, first_of, opt_bool, opt_f64, opt_string, opt_timestamp, pick,
    price_levels, req_f64, req_string,
};
use super::{
    AuthRequest, ExchangeProtocolAdapter, OutboundRequest, SignedRequest, StreamKind,
    SubscriptionAction, encode_query, fmt_decimal,
};
use crate::application::ports::{ChannelKind, RestQuery, SnapshotKind};
use crate::domain::canonical::{
    AccountBalance, CanonicalEvent, OrderBookSnapshot, OrderEvent, PositionUpdate, Trade,
};
use crate::domain::order_execution::{Order, OrderEventKind, OrderRequest, OrderSide, OrderType};
use crate::domain::shared::{ClOrdId, SessionCredentials, Venue, VenueOrderId, now_micros};
use crate::error::{GatewayError, GatewayResult};

/// Default cookie issuing endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://edge.grvt.io/auth/api_key/login";

/// Envelope flavour for outbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrvtEnvelope {
    /// `jsonrpc/method/params/id`.
    #[default]
    Full,
    /// `j/m/p/i`.
    Lite,
}

/// GRVT protocol adapter.
#[derive(Debug, Clone)]
pub struct GrvtAdapter {
    envelope: GrvtEnvelope,
    sub_account_id: String,
    auth_url: String,
}

impl Default for GrvtAdapter {
    fn default() -> Self {
        Self::new("")
    }
}

impl GrvtAdapter {
    /// Adapter trading for `sub_account_id`.
    #[must_use]
    pub fn new(sub_account_id: impl Into<String>) -> Self {
        Self {
            envelope: GrvtEnvelope::Full,
            sub_account_id: sub_account_id.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
        }
    }

    /// Choose the outbound envelope.
    #[must_use]
    pub const fn with_envelope(mut self, envelope: GrvtEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// Override the cookie issuing endpoint.
    #[must_use]
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Outbound envelope in use.
    #[must_use]
    pub const fn envelope(&self) -> GrvtEnvelope {
        self.envelope
    }

    /// Trading sub-account.
    #[must_use]
    pub fn sub_account_id(&self) -> &str {
        &self.sub_account_id
    }

    fn rpc(&self, id: u64, method: &str, stream: &str, selectors: &[&str]) -> String {
        match self.envelope {
            GrvtEnvelope::Full => json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": {"stream": stream, "selectors": selectors},
                "id": id,
            }),
            GrvtEnvelope::Lite => json!({
                "j": "2.0",
                "m": method,
                "p": {"s": stream, "s1": selectors},
                "i": id,
            }),
        }
        .to_string()
    }

    fn status_kind(status: &str, traded: f64) -> Result<OrderEventKind, ParseError> {
        match status {
            "PENDING" | "OPEN" if traded > 0.0 => Ok(OrderEventKind::Fill),
            "PENDING" | "OPEN" => Ok(OrderEventKind::Ack),
            "FILLED" => Ok(OrderEventKind::Fill),
            "CANCELLED" => Ok(OrderEventKind::Cancel),
            "REJECTED" => Ok(OrderEventKind::Reject),
            other => Err(ParseError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }

    fn account_body(&self) -> Value {
        json!({"sub_account_id": self.sub_account_id})
    }

    fn account_summary(&self, summary: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        let ts = opt_timestamp(summary, &["event_time", "et"]).unwrap_or_else(now_micros);
        let settle = opt_string(summary, &["settle_currency", "sc"]);
        let settle_available = opt_f64(summary, &["available_balance", "ab"]);

        let mut events = Vec::new();
        let balances = pick(summary, &["spot_balances", "sb"]).and_then(Value::as_array);
        for raw in balances.into_iter().flatten() {
            let asset = req_string(raw, "currency", &["currency", "c"])?;
            let wallet = req_f64(raw, "balance", &["balance", "b"])?;
            let available = if settle.as_deref() == Some(asset.as_str()) {
                settle_available.unwrap_or(wallet)
            } else {
                wallet
            };
            if let Some(balance) =
                AccountBalance::from_wallet_available(self.venue(), asset, wallet, available, ts)
            {
                events.push(CanonicalEvent::Balance(balance));
            }
        }
        Ok(events)
    }
}

fn as_items(data: &Value) -> &[Value] {
    match data {
        Value::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}

impl ExchangeProtocolAdapter for GrvtAdapter {
    fn venue(&self) -> Venue {
        Venue::Grvt
    }

    fn parse_order_event(&self, raw: &Value) -> Result<OrderEvent, ParseError> {
        let metadata = pick(raw, &["metadata", "m"]);
        let order_id = opt_string(raw, &["order_id", "oi"]);
        let cl_ord_id = metadata
            .and_then(|m| opt_string(m, &["client_order_id", "co"]))
            .or_else(|| order_id.clone())
            .ok_or(ParseError::MissingField("client_order_id"))?;

        let state = pick(raw, &["state", "s1"]).ok_or(ParseError::MissingField("state"))?;
        let status = req_string(state, "status", &["status", "s"])?;
        let traded = pick(state, &["traded_size", "ts"])
            .map(first_of)
            .and_then(as_f64)
            .unwrap_or_default();
        let kind = Self::status_kind(&status, traded)?;
        let avg = pick(state, &["avg_fill_price", "af"])
            .map(first_of)
            .and_then(as_f64)
            .filter(|p| *p > 0.0);

        let leg = pick(raw, &["legs", "l"])
            .map(first_of)
            .ok_or(ParseError::MissingField("legs"))?;
        let symbol = req_string(leg, "instrument", &["instrument", "i"])?;
        let ts = opt_timestamp(state, &["update_time", "ut"])
            .or_else(|| metadata.and_then(|m| opt_timestamp(m, &["create_time", "ct"])))
            .unwrap_or_else(now_micros);

        let mut event = OrderEvent::new(self.venue(), ClOrdId::new(cl_ord_id), symbol, kind, ts);
        event.venue_order_id = order_id.map(VenueOrderId::new);
        event.side = opt_bool(leg, &["is_buying_asset", "ib"])
            .map(|buying| if buying { OrderSide::Buy } else { OrderSide::Sell });
        event.cumulative_qty = Some(traded);
        event.fill_price = avg.unwrap_or_default();
        event.avg_price = avg;
        event.order_qty = opt_f64(leg, &["size", "s"]);
        event.order_price = opt_f64(leg, &["limit_price", "lp"]).filter(|p| *p > 0.0);
        if matches!(kind, OrderEventKind::Cancel | OrderEventKind::Reject) {
            event.reason = opt_string(state, &["reject_reason", "rr"])
                .filter(|r| r != "UNSPECIFIED")
                .or(Some(status));
        }
        Ok(event)
    }

    fn parse_position(&self, raw: &Value) -> Result<Option<PositionUpdate>, ParseError> {
        Ok(PositionUpdate::from_signed(
            self.venue(),
            req_string(raw, "instrument", &["instrument", "i"])?,
            req_f64(raw, "size", &["size", "s"])?,
            opt_f64(raw, &["entry_price", "ep"]).unwrap_or_default(),
            opt_f64(raw, &["unrealized_pnl", "up"]).unwrap_or_default(),
            opt_timestamp(raw, &["event_time", "et"]).unwrap_or_else(now_micros),
        ))
    }

    fn parse_balance(&self, raw: &Value) -> Result<Option<AccountBalance>, ParseError> {
        let wallet = req_f64(raw, "balance", &["balance", "b"])?;
        Ok(AccountBalance::from_wallet_available(
            self.venue(),
            req_string(raw, "currency", &["currency", "c"])?,
            wallet,
            opt_f64(raw, &["available", "a"]).unwrap_or(wallet),
            opt_timestamp(raw, &["event_time", "et"]).unwrap_or_else(now_micros),
        ))
    }

    fn parse_trade(&self, raw: &Value) -> Result<Trade, ParseError> {
        Ok(Trade {
            venue: self.venue(),
            symbol: req_string(raw, "instrument", &["instrument", "i"])?,
            trade_id: req_string(raw, "trade_id", &["trade_id", "ti"])?,
            price: req_f64(raw, "price", &["price", "p"])?,
            qty: req_f64(raw, "size", &["size", "s"])?,
            side: opt_bool(raw, &["is_taker_buyer", "it"])
                .map(|buyer| if buyer { OrderSide::Buy } else { OrderSide::Sell }),
            timestamp_us: opt_timestamp(raw, &["event_time", "et"]).unwrap_or_else(now_micros),
        })
    }

    fn parse_orderbook(&self, raw: &Value) -> Result<OrderBookSnapshot, ParseError> {
        let (bids, asks) = if raw.get("bids").is_some() || raw.get("asks").is_some() {
            (price_levels(raw, "bids")?, price_levels(raw, "asks")?)
        } else {
            (price_levels(raw, "b")?, price_levels(raw, "a")?)
        };
        Ok(OrderBookSnapshot {
            venue: self.venue(),
            symbol: req_string(raw, "instrument", &["instrument", "i"])?,
            bids,
            asks,
            sequence: None,
            timestamp_us: opt_timestamp(raw, &["event_time", "et"]).unwrap_or_else(now_micros),
        })
    }

    fn route(&self, channel: ChannelKind, raw: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        if let Some(error) = pick(raw, &["error", "e"]).filter(|e| e.is_object()) {
            tracing::warn!(venue = %self.venue(), %channel, %error, "Request failed");
            return Ok(Vec::new());
        }
        let Some(feed) = pick(raw, &["feed", "f"]) else {
            if pick(raw, &["result", "r"]).is_some() {
                tracing::debug!(venue = %self.venue(), %channel, "Request acknowledged");
                return Ok(Vec::new());
            }
            return Err(ParseError::MissingField("feed"));
        };
        let stream = req_string(raw, "stream", &["stream", "s"])?;
        let sequence = opt_string(raw, &["sequence_number", "n"]).and_then(|n| n.parse().ok());

        match stream.as_str() {
            "v1.order" => as_items(feed)
                .iter()
                .map(|o| self.parse_order_event(o).map(CanonicalEvent::Order))
                .collect(),
            "v1.position" => {
                let mut events = Vec::new();
                for raw in as_items(feed) {
                    if let Some(position) = self.parse_position(raw)? {
                        events.push(CanonicalEvent::Position(position));
                    }
                }
                Ok(events)
            }
            "v1.trade" => as_items(feed)
                .iter()
                .map(|t| self.parse_trade(t).map(CanonicalEvent::Trade))
                .collect(),
            s if s.starts_with("v1.book") => {
                let mut book = self.parse_orderbook(feed)?;
                book.sequence = sequence;
                Ok(vec![CanonicalEvent::OrderBook(book)])
            }
            other => {
                tracing::debug!(venue = %self.venue(), stream = other, "Ignoring stream");
                Ok(Vec::new())
            }
        }
    }

    fn build_auth(
        &self,
        credentials: &SessionCredentials,
        request: &AuthRequest<'_>,
    ) -> GatewayResult<SignedRequest> {
        let mut signed = SignedRequest {
            headers: Vec::new(),
            query: encode_query(&request.query.params),
            body: request.body.map(str::to_string),
        };
        if request.query.signed {
            signed.headers = self.handshake_headers(credentials, ChannelKind::Private);
            if signed.headers.is_empty() {
                return Err(GatewayError::authentication(
                    "grvt requires a session cookie and account id",
                ));
            }
        }
        Ok(signed)
    }

    fn handshake_headers(
        &self,
        credentials: &SessionCredentials,
        channel: ChannelKind,
    ) -> Vec<(String, String)> {
        match credentials {
            SessionCredentials::Cookie {
                session_cookie,
                account_id,
                ..
            } if channel.requires_auth() && !session_cookie.is_empty() => vec![
                ("Cookie".into(), format!("gravity={session_cookie}")),
                ("X-Grvt-Account-Id".into(), account_id.clone()),
            ],
            _ => Vec::new(),
        }
    }

    fn subscription_channel(&self, stream: StreamKind, symbol: &str) -> Option<String> {
        match stream {
            StreamKind::Trades => Some(format!("v1.trade:{symbol}@500")),
            StreamKind::OrderBook => Some(format!("v1.book.s:{symbol}@500-10")),
            StreamKind::Orders => Some(format!("v1.order:{}-{symbol}", self.sub_account_id)),
            StreamKind::Positions => Some(format!("v1.position:{}-{symbol}", self.sub_account_id)),
            StreamKind::Balances => None,
        }
    }

    fn build_subscription_request(
        &self,
        channels: &[String],
        action: SubscriptionAction,
        id: u64,
    ) -> Vec<String> {
        let method = match action {
            SubscriptionAction::Subscribe => "subscribe",
            SubscriptionAction::Unsubscribe => "unsubscribe",
        };
        let mut by_stream: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for channel in channels {
            let (stream, selector) = channel.split_once(':').unwrap_or((channel.as_str(), ""));
            let selectors = by_stream.entry(stream).or_default();
            if !selector.is_empty() {
                selectors.push(selector);
            }
        }
        by_stream
            .into_iter()
            .zip(id..)
            .map(|((stream, selectors), id)| self.rpc(id, method, stream, &selectors))
            .collect()
    }

    fn session_refresh_query(&self, credentials: &SessionCredentials) -> Option<RestQuery> {
        match credentials {
            SessionCredentials::Cookie {
                api_key: Some(api_key),
                ..
            } if !api_key.is_empty() => Some(RestQuery::post(
                self.auth_url.clone(),
                json!({"api_key": api_key}),
            )),
            _ => None,
        }
    }

    fn build_order(&self, request: &OrderRequest, _id: u64) -> GatewayResult<OutboundRequest> {
        if request.cl_ord_id.as_str().parse::<u64>().is_err() {
            return Err(GatewayError::validation("grvt client order ids must be numeric")
                .with_context("cl_ord_id", request.cl_ord_id.as_str()));
        }
        let is_market = request.order_type == OrderType::Market;
        let mut leg = json!({
            "instrument": request.symbol,
            "size": fmt_decimal(request.quantity),
            "is_buying_asset": request.side == OrderSide::Buy,
        });
        if !is_market {
            leg["limit_price"] = json!(fmt_decimal(request.price));
        }
        let order = json!({
            "sub_account_id": self.sub_account_id,
            "is_market": is_market,
            "time_in_force": if is_market { "IMMEDIATE_OR_CANCEL" } else { "GOOD_TILL_TIME" },
            "post_only": request.order_type == OrderType::PostOnly,
            "reduce_only": false,
            "legs": [leg],
            "metadata": {"client_order_id": request.cl_ord_id.as_str()},
        });
        Ok(OutboundRequest::Rest(
            RestQuery::post("/full/v1/create_order", json!({"order": order})).signed(),
        ))
    }

    fn build_cancel(&self, order: &Order, _id: u64) -> GatewayResult<OutboundRequest> {
        Ok(OutboundRequest::Rest(
            RestQuery::post(
                "/full/v1/cancel_order",
                json!({
                    "sub_account_id": self.sub_account_id,
                    "client_order_id": order.cl_ord_id.as_str(),
                }),
            )
            .signed(),
        ))
    }

    fn build_modify(
        &self,
        order: &Order,
        _new_quantity: f64,
        _new_price: Option<f64>,
        _id: u64,
    ) -> GatewayResult<OutboundRequest> {
        Err(
            GatewayError::validation("grvt has no amend; cancel and resend instead")
                .with_context("cl_ord_id", order.cl_ord_id.as_str()),
        )
    }

    fn reconciliation_query(&self, kind: SnapshotKind) -> RestQuery {
        let path = match kind {
            SnapshotKind::OpenOrders => "/full/v1/open_orders",
            SnapshotKind::Positions => "/full/v1/positions",
            SnapshotKind::Balances => "/full/v1/account_summary",
        };
        RestQuery::post(path, self.account_body()).signed()
    }

    fn parse_snapshot(
        &self,
        kind: SnapshotKind,
        body: &Value,
    ) -> Result<Vec<CanonicalEvent>, ParseError> {
        let result = pick(body, &["result", "r"]).unwrap_or(body);
        match kind {
            SnapshotKind::OpenOrders => as_items(result)
                .iter()
                .map(|o| self.parse_order_event(o).map(CanonicalEvent::Order))
                .collect(),
            SnapshotKind::Positions => {
                let mut events = Vec::new();
                for raw in as_items(result) {
                    if let Some(position) = self.parse_position(raw)? {
                        events.push(CanonicalEvent::Position(position));
                    }
                }
                Ok(events)
            }
            SnapshotKind::Balances => self.account_summary(result),
        }
    }
}
