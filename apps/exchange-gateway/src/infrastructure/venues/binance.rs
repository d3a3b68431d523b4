//! Binance USDⓈ-M futures.
//!
//! Market data arrives on `<symbol>@<stream>` channels, user data on a
//! listen-key stream that needs no subscription. Orders go over signed REST.

use serde_json::{Value, json};

use super::wire::{
    ParseError, opt_f64, opt_string, opt_timestamp, price_levels, req_f64, req_string,
};
use super::{
    AuthRequest, ExchangeProtocolAdapter, OutboundRequest, SignedRequest, StreamKind,
    SubscriptionAction, encode_query, fmt_decimal, sign_query,
};
use crate::application::ports::{ChannelKind, HttpMethod, RestQuery, SnapshotKind};
use crate::domain::canonical::{
    AccountBalance, CanonicalEvent, OrderBookSnapshot, OrderEvent, PositionUpdate, Trade,
};
use crate::domain::order_execution::{Order, OrderEventKind, OrderRequest, OrderSide, OrderType};
use crate::domain::shared::{ClOrdId, SessionCredentials, Venue, VenueOrderId, now_micros};
use crate::error::{GatewayError, GatewayResult};

const ORDER_PATH: &str = "/fapi/v1/order";
const LISTEN_KEY_PATH: &str = "/fapi/v1/listenKey";

/// Binance protocol adapter.
#[derive(Debug, Clone)]
pub struct BinanceAdapter {
    recv_window_ms: u64,
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new(5_000)
    }
}

impl BinanceAdapter {
    /// `aggTrade` carries its id in `a`; raw `trade` events use `t` and may
    /// reuse `a` for the seller order id.
    fn trade_id_keys(raw: &Value) -> &'static [&'static str] {
        if raw.get("e").and_then(Value::as_str) == Some("aggTrade") {
            &["a"]
        } else {
            &["t"]
        }
    }

    /// Adapter signing with the given `recvWindow`.
    #[must_use]
    pub const fn new(recv_window_ms: u64) -> Self {
        Self { recv_window_ms }
    }

    fn status_kind(status: &str) -> Result<OrderEventKind, ParseError> {
        match status {
            "NEW" => Ok(OrderEventKind::Ack),
            "PARTIALLY_FILLED" | "FILLED" => Ok(OrderEventKind::Fill),
            "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderEventKind::Cancel),
            "REJECTED" => Ok(OrderEventKind::Reject),
            other => Err(ParseError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }

    /// Order from the REST shape (`/fapi/v1/openOrders`).
    fn parse_rest_order(&self, raw: &Value) -> Result<OrderEvent, ParseError> {
        let status = req_string(raw, "status", &["status"])?;
        let kind = Self::status_kind(&status)?;
        let cl_ord_id = req_string(raw, "clientOrderId", &["clientOrderId"])?;
        let symbol = req_string(raw, "symbol", &["symbol"])?;
        let ts = opt_timestamp(raw, &["updateTime", "time"]).unwrap_or_else(now_micros);

        let mut event = OrderEvent::new(self.venue(), ClOrdId::new(cl_ord_id), symbol, kind, ts);
        event.venue_order_id = opt_string(raw, &["orderId"]).map(VenueOrderId::new);
        event.side = opt_string(raw, &["side"]).and_then(|s| OrderSide::from_wire(&s));
        event.cumulative_qty = opt_f64(raw, &["executedQty"]);
        event.avg_price = opt_f64(raw, &["avgPrice"]).filter(|p| *p > 0.0);
        event.order_qty = opt_f64(raw, &["origQty"]);
        event.order_price = opt_f64(raw, &["price"]);
        Ok(event)
    }

    fn position_at(&self, raw: &Value, fallback_ts: i64) -> Result<Option<PositionUpdate>, ParseError> {
        let symbol = req_string(raw, "symbol", &["s", "symbol"])?;
        let qty = req_f64(raw, "positionAmt", &["pa", "positionAmt"])?;
        let entry = opt_f64(raw, &["ep", "entryPrice"]).unwrap_or_default();
        let upnl = opt_f64(raw, &["up", "unRealizedProfit"]).unwrap_or_default();
        let ts = opt_timestamp(raw, &["updateTime"]).unwrap_or(fallback_ts);
        Ok(PositionUpdate::from_signed(self.venue(), symbol, qty, entry, upnl, ts))
    }

    fn balance_at(&self, raw: &Value, fallback_ts: i64) -> Result<Option<AccountBalance>, ParseError> {
        let asset = req_string(raw, "asset", &["a", "asset"])?;
        let wallet = req_f64(raw, "balance", &["wb", "balance"])?;
        let available = opt_f64(raw, &["cw", "availableBalance", "crossWalletBalance"])
            .unwrap_or(wallet);
        let ts = opt_timestamp(raw, &["updateTime"]).unwrap_or(fallback_ts);
        Ok(AccountBalance::from_wallet_available(
            self.venue(),
            asset,
            wallet,
            available,
            ts,
        ))
    }

    fn account_update(&self, raw: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        let ts = opt_timestamp(raw, &["T", "E"]).unwrap_or_else(now_micros);
        let account = raw.get("a").ok_or(ParseError::MissingField("a"))?;
        let mut events = Vec::new();

        for balance in account.get("B").and_then(Value::as_array).into_iter().flatten() {
            if let Some(b) = self.balance_at(balance, ts)? {
                events.push(CanonicalEvent::Balance(b));
            }
        }
        for position in account.get("P").and_then(Value::as_array).into_iter().flatten() {
            if let Some(p) = self.position_at(position, ts)? {
                events.push(CanonicalEvent::Position(p));
            }
        }
        Ok(events)
    }

    fn each<T>(
        body: &Value,
        mut parse: impl FnMut(&Value) -> Result<Option<T>, ParseError>,
        wrap: impl Fn(T) -> CanonicalEvent,
    ) -> Result<Vec<CanonicalEvent>, ParseError> {
        let items = body.as_array().ok_or_else(|| ParseError::InvalidField {
            field: "body",
            value: "expected array".into(),
        })?;
        let mut events = Vec::with_capacity(items.len());
        for item in items {
            if let Some(parsed) = parse(item)? {
                events.push(wrap(parsed));
            }
        }
        Ok(events)
    }

    fn order_query(&self, method: HttpMethod) -> RestQuery {
        RestQuery::get(ORDER_PATH).with_method(method).signed()
    }
}

impl ExchangeProtocolAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn parse_order_event(&self, raw: &Value) -> Result<OrderEvent, ParseError> {
        let order = raw.get("o").unwrap_or(raw);
        let status = req_string(order, "X", &["X"])?;
        let kind = Self::status_kind(&status)?;
        let cl_ord_id = req_string(order, "c", &["c"])?;
        let symbol = req_string(order, "s", &["s"])?;
        let ts = opt_timestamp(order, &["T"])
            .or_else(|| opt_timestamp(raw, &["T", "E"]))
            .unwrap_or_else(now_micros);

        let mut event = OrderEvent::new(self.venue(), ClOrdId::new(cl_ord_id), symbol, kind, ts);
        event.venue_order_id = opt_string(order, &["i"]).map(VenueOrderId::new);
        event.side = opt_string(order, &["S"]).and_then(|s| OrderSide::from_wire(&s));
        event.fill_qty = opt_f64(order, &["l"]).unwrap_or_default();
        event.fill_price = opt_f64(order, &["L"]).unwrap_or_default();
        event.cumulative_qty = opt_f64(order, &["z"]);
        event.avg_price = opt_f64(order, &["ap"]).filter(|p| *p > 0.0);
        event.order_qty = opt_f64(order, &["q"]);
        event.order_price = opt_f64(order, &["p"]);
        if matches!(kind, OrderEventKind::Cancel | OrderEventKind::Reject) {
            event.reason = Some(status);
        }
        Ok(event)
    }

    fn parse_position(&self, raw: &Value) -> Result<Option<PositionUpdate>, ParseError> {
        self.position_at(raw, now_micros())
    }

    fn parse_balance(&self, raw: &Value) -> Result<Option<AccountBalance>, ParseError> {
        self.balance_at(raw, now_micros())
    }

    fn parse_trade(&self, raw: &Value) -> Result<Trade, ParseError> {
        // Buyer is maker, so the aggressor sold.
        let side = raw
            .get("m")
            .and_then(Value::as_bool)
            .map(|maker| if maker { OrderSide::Sell } else { OrderSide::Buy });
        Ok(Trade {
            venue: self.venue(),
            symbol: req_string(raw, "s", &["s"])?,
            trade_id: req_string(raw, "trade_id", Self::trade_id_keys(raw))?,
            price: req_f64(raw, "p", &["p"])?,
            qty: req_f64(raw, "q", &["q"])?,
            side,
            timestamp_us: opt_timestamp(raw, &["T", "E"]).unwrap_or_else(now_micros),
        })
    }

    fn parse_orderbook(&self, raw: &Value) -> Result<OrderBookSnapshot, ParseError> {
        Ok(OrderBookSnapshot {
            venue: self.venue(),
            symbol: req_string(raw, "s", &["s"])?,
            bids: price_levels(raw, "b")?,
            asks: price_levels(raw, "a")?,
            sequence: raw.get("u").and_then(Value::as_u64),
            timestamp_us: opt_timestamp(raw, &["T", "E"]).unwrap_or_else(now_micros),
        })
    }

    fn route(&self, channel: ChannelKind, raw: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        // Combined streams wrap the payload.
        let raw = match (raw.get("stream"), raw.get("data")) {
            (Some(_), Some(data)) => data,
            _ => raw,
        };
        if raw.get("e").is_none() && raw.get("id").is_some() {
            tracing::debug!(venue = %self.venue(), %channel, "Subscription response");
            return Ok(Vec::new());
        }

        let event_type = raw
            .get("e")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField("e"))?;
        match event_type {
            "ORDER_TRADE_UPDATE" => Ok(vec![CanonicalEvent::Order(self.parse_order_event(raw)?)]),
            "ACCOUNT_UPDATE" => self.account_update(raw),
            "aggTrade" | "trade" => Ok(vec![CanonicalEvent::Trade(self.parse_trade(raw)?)]),
            "depthUpdate" => Ok(vec![CanonicalEvent::OrderBook(self.parse_orderbook(raw)?)]),
            "listenKeyExpired" => {
                tracing::warn!(venue = %self.venue(), "Listen key expired");
                Ok(Vec::new())
            }
            other => {
                tracing::debug!(venue = %self.venue(), event_type = other, "Ignoring event");
                Ok(Vec::new())
            }
        }
    }

    fn build_auth(
        &self,
        credentials: &SessionCredentials,
        request: &AuthRequest<'_>,
    ) -> GatewayResult<SignedRequest> {
        let SessionCredentials::ApiKey {
            api_key,
            api_secret,
        } = credentials
        else {
            return Err(GatewayError::authentication(
                "binance requires api key credentials",
            ));
        };

        let query = if request.query.signed {
            let mut params = request.query.params.clone();
            params.push(("recvWindow".into(), self.recv_window_ms.to_string()));
            sign_query(api_secret, &params, request.timestamp_ms)
        } else {
            encode_query(&request.query.params)
        };
        Ok(SignedRequest {
            headers: vec![("X-MBX-APIKEY".into(), api_key.clone())],
            query,
            body: request.body.map(str::to_string),
        })
    }

    fn subscription_channel(&self, stream: StreamKind, symbol: &str) -> Option<String> {
        let symbol = symbol.to_ascii_lowercase();
        match stream {
            StreamKind::Trades => Some(format!("{symbol}@aggTrade")),
            StreamKind::OrderBook => Some(format!("{symbol}@depth20@100ms")),
            StreamKind::Orders | StreamKind::Positions | StreamKind::Balances => None,
        }
    }

    fn build_subscription_request(
        &self,
        channels: &[String],
        action: SubscriptionAction,
        id: u64,
    ) -> Vec<String> {
        if channels.is_empty() {
            return Vec::new();
        }
        let method = match action {
            SubscriptionAction::Subscribe => "SUBSCRIBE",
            SubscriptionAction::Unsubscribe => "UNSUBSCRIBE",
        };
        vec![json!({"method": method, "params": channels, "id": id}).to_string()]
    }

    fn session_refresh_query(&self, _credentials: &SessionCredentials) -> Option<RestQuery> {
        Some(RestQuery::get(LISTEN_KEY_PATH).with_method(HttpMethod::Put))
    }

    fn user_stream_query(&self) -> Option<RestQuery> {
        Some(RestQuery::get(LISTEN_KEY_PATH).with_method(HttpMethod::Post))
    }

    fn build_order(&self, request: &OrderRequest, _id: u64) -> GatewayResult<OutboundRequest> {
        let mut query = self
            .order_query(HttpMethod::Post)
            .param("symbol", request.symbol.to_ascii_uppercase())
            .param("side", request.side.to_string());
        query = match request.order_type {
            OrderType::Market => query.param("type", "MARKET"),
            OrderType::Limit => query.param("type", "LIMIT").param("timeInForce", "GTC"),
            OrderType::PostOnly => query.param("type", "LIMIT").param("timeInForce", "GTX"),
        };
        query = query.param("quantity", fmt_decimal(request.quantity));
        if request.order_type.requires_limit_price() {
            query = query.param("price", fmt_decimal(request.price));
        }
        query = query.param("newClientOrderId", request.cl_ord_id.as_str());
        Ok(OutboundRequest::Rest(query))
    }

    fn build_cancel(&self, order: &Order, _id: u64) -> GatewayResult<OutboundRequest> {
        Ok(OutboundRequest::Rest(
            self.order_query(HttpMethod::Delete)
                .param("symbol", order.symbol.to_ascii_uppercase())
                .param("origClientOrderId", order.cl_ord_id.as_str()),
        ))
    }

    fn build_modify(
        &self,
        order: &Order,
        new_quantity: f64,
        new_price: Option<f64>,
        _id: u64,
    ) -> GatewayResult<OutboundRequest> {
        if !order.order_type.requires_limit_price() {
            return Err(GatewayError::validation("binance can only amend limit orders")
                .with_context("cl_ord_id", order.cl_ord_id.as_str()));
        }
        Ok(OutboundRequest::Rest(
            self.order_query(HttpMethod::Put)
                .param("symbol", order.symbol.to_ascii_uppercase())
                .param("origClientOrderId", order.cl_ord_id.as_str())
                .param("side", order.side.to_string())
                .param("quantity", fmt_decimal(new_quantity))
                .param("price", fmt_decimal(new_price.unwrap_or(order.price))),
        ))
    }

    fn reconciliation_query(&self, kind: SnapshotKind) -> RestQuery {
        let path = match kind {
            SnapshotKind::OpenOrders => "/fapi/v1/openOrders",
            SnapshotKind::Positions => "/fapi/v2/positionRisk",
            SnapshotKind::Balances => "/fapi/v2/balance",
        };
        RestQuery::get(path).signed()
    }

    fn parse_snapshot(
        &self,
        kind: SnapshotKind,
        body: &Value,
    ) -> Result<Vec<CanonicalEvent>, ParseError> {
        let now = now_micros();
        match kind {
            SnapshotKind::OpenOrders => Self::each(
                body,
                |raw| self.parse_rest_order(raw).map(Some),
                CanonicalEvent::Order,
            ),
            SnapshotKind::Positions => {
                Self::each(body, |raw| self.position_at(raw, now), CanonicalEvent::Position)
            }
            SnapshotKind::Balances => {
                Self::each(body, |raw| self.balance_at(raw, now), CanonicalEvent::Balance)
            }
        }
    }
}
