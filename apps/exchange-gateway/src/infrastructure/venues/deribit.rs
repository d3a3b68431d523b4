//! Deribit JSON-RPC v2.
//!
//! Everything, orders included, travels over the WebSocket as JSON-RPC.
//! Pushed data arrives as `subscription` notifications keyed by channel
//! name; the REST API is only used for reconciliation snapshots.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{Value, json};

use super::wire::{
    ParseError, opt_f64, opt_string, opt_timestamp, price_levels, req_f64, req_string,
};
use super::{
    AuthRequest, ExchangeProtocolAdapter, OutboundRequest, SignedRequest, StreamKind,
    SubscriptionAction, encode_query,
};
use crate::application::ports::{ChannelKind, RestQuery, SnapshotKind};
use crate::domain::canonical::{
    AccountBalance, CanonicalEvent, OrderBookSnapshot, OrderEvent, PositionUpdate, Trade,
};
use crate::domain::order_execution::{Order, OrderEventKind, OrderRequest, OrderSide, OrderType};
use crate::domain::shared::{ClOrdId, SessionCredentials, Venue, VenueOrderId, now_micros};
use crate::error::{GatewayError, GatewayResult};

use super::signing::deribit_authorization;

/// Requests awaiting a response are forgotten past this many.
const MAX_PENDING: usize = 4_096;

/// Deribit protocol adapter.
#[derive(Debug, Default)]
pub struct DeribitAdapter {
    /// Order requests in flight, by JSON-RPC id, so an error response can be
    /// turned into a reject for the right order.
    pending: Mutex<HashMap<u64, (ClOrdId, String)>>,
}

impl DeribitAdapter {
    /// New adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rpc(id: u64, method: &str, params: Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
    }

    fn track(&self, id: u64, cl_ord_id: &ClOrdId, symbol: &str) {
        let mut pending = self.pending.lock();
        if pending.len() >= MAX_PENDING {
            pending.clear();
        }
        pending.insert(id, (cl_ord_id.clone(), symbol.to_string()));
    }

    fn auth_params(credentials: &SessionCredentials) -> Option<Value> {
        match credentials {
            SessionCredentials::ApiKey {
                api_key,
                api_secret,
            } => Some(json!({
                "grant_type": "client_credentials",
                "client_id": api_key,
                "client_secret": api_secret,
            })),
            _ => None,
        }
    }

    fn state_kind(state: &str, filled: f64) -> Result<OrderEventKind, ParseError> {
        match state {
            "open" if filled > 0.0 => Ok(OrderEventKind::Fill),
            "open" | "untriggered" => Ok(OrderEventKind::Ack),
            "filled" => Ok(OrderEventKind::Fill),
            "cancelled" => Ok(OrderEventKind::Cancel),
            "rejected" => Ok(OrderEventKind::Reject),
            other => Err(ParseError::InvalidField {
                field: "order_state",
                value: other.to_string(),
            }),
        }
    }

    fn orders_in(&self, data: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        as_items(data)
            .iter()
            .map(|raw| self.parse_order_event(raw).map(CanonicalEvent::Order))
            .collect()
    }

    fn positions_in(&self, data: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        let mut events = Vec::new();
        for raw in as_items(data) {
            if let Some(position) = self.parse_position(raw)? {
                events.push(CanonicalEvent::Position(position));
            }
        }
        Ok(events)
    }

    fn balances_in(&self, data: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        let data = data.get("summaries").unwrap_or(data);
        let mut events = Vec::new();
        for raw in as_items(data) {
            if let Some(balance) = self.parse_balance(raw)? {
                events.push(CanonicalEvent::Balance(balance));
            }
        }
        Ok(events)
    }

    fn notification(&self, params: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        let channel = params
            .get("channel")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField("channel"))?;
        let data = params.get("data").ok_or(ParseError::MissingField("data"))?;

        if channel.starts_with("trades.") {
            as_items(data)
                .iter()
                .map(|raw| self.parse_trade(raw).map(CanonicalEvent::Trade))
                .collect()
        } else if channel.starts_with("book.") {
            Ok(vec![CanonicalEvent::OrderBook(self.parse_orderbook(data)?)])
        } else if channel.starts_with("user.orders.") {
            self.orders_in(data)
        } else if channel.starts_with("user.changes.") {
            let mut events = Vec::new();
            if let Some(orders) = data.get("orders") {
                events.extend(self.orders_in(orders)?);
            }
            if let Some(positions) = data.get("positions") {
                events.extend(self.positions_in(positions)?);
            }
            Ok(events)
        } else if channel.starts_with("user.portfolio.") {
            self.balances_in(data)
        } else {
            tracing::debug!(venue = %self.venue(), channel, "Ignoring notification");
            Ok(Vec::new())
        }
    }

    fn response(&self, raw: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        let id = raw.get("id").and_then(Value::as_u64);
        let pending = id.and_then(|id| self.pending.lock().remove(&id));

        if let Some(error) = raw.get("error") {
            let message = opt_string(error, &["message"]).unwrap_or_else(|| error.to_string());
            tracing::warn!(venue = %self.venue(), ?id, error = %message, "Request failed");
            return Ok(pending
                .map(|(cl_ord_id, symbol)| {
                    let mut event = OrderEvent::new(
                        self.venue(),
                        cl_ord_id,
                        symbol,
                        OrderEventKind::Reject,
                        now_micros(),
                    );
                    event.reason = Some(message);
                    vec![CanonicalEvent::Order(event)]
                })
                .unwrap_or_default());
        }

        match raw.get("result").and_then(|r| r.get("order")) {
            Some(order) => Ok(vec![CanonicalEvent::Order(self.parse_order_event(order)?)]),
            None => Ok(Vec::new()),
        }
    }
}

fn as_items(data: &Value) -> &[Value] {
    match data {
        Value::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}

impl ExchangeProtocolAdapter for DeribitAdapter {
    fn venue(&self) -> Venue {
        Venue::Deribit
    }

    fn parse_order_event(&self, raw: &Value) -> Result<OrderEvent, ParseError> {
        let order_id = req_string(raw, "order_id", &["order_id"])?;
        let filled = opt_f64(raw, &["filled_amount"]).unwrap_or_default();
        let state = req_string(raw, "order_state", &["order_state"])?;
        let kind = Self::state_kind(&state, filled)?;
        let symbol = req_string(raw, "instrument_name", &["instrument_name"])?;
        // Orders placed outside this process carry no label.
        let cl_ord_id = opt_string(raw, &["label"]).unwrap_or_else(|| order_id.clone());
        let ts = opt_timestamp(raw, &["last_update_timestamp", "creation_timestamp"])
            .unwrap_or_else(now_micros);
        let avg = opt_f64(raw, &["average_price"]).filter(|p| *p > 0.0);

        let mut event = OrderEvent::new(self.venue(), ClOrdId::new(cl_ord_id), symbol, kind, ts);
        event.venue_order_id = Some(VenueOrderId::new(order_id));
        event.side = opt_string(raw, &["direction"]).and_then(|d| OrderSide::from_wire(&d));
        event.cumulative_qty = Some(filled);
        event.fill_price = avg.unwrap_or_default();
        event.avg_price = avg;
        event.order_qty = opt_f64(raw, &["amount"]);
        // Market orders report the string "market_price".
        event.order_price = opt_f64(raw, &["price"]);
        if matches!(kind, OrderEventKind::Cancel | OrderEventKind::Reject) {
            event.reason = opt_string(raw, &["cancel_reason", "reject_reason"]).or(Some(state));
        }
        Ok(event)
    }

    fn parse_position(&self, raw: &Value) -> Result<Option<PositionUpdate>, ParseError> {
        let symbol = req_string(raw, "instrument_name", &["instrument_name"])?;
        let mut size = req_f64(raw, "size", &["size"])?;
        if raw.get("direction").and_then(Value::as_str) == Some("sell") && size > 0.0 {
            size = -size;
        }
        Ok(PositionUpdate::from_signed(
            self.venue(),
            symbol,
            size,
            opt_f64(raw, &["average_price"]).unwrap_or_default(),
            opt_f64(raw, &["floating_profit_loss", "total_profit_loss"]).unwrap_or_default(),
            opt_timestamp(raw, &["timestamp", "creation_timestamp"]).unwrap_or_else(now_micros),
        ))
    }

    fn parse_balance(&self, raw: &Value) -> Result<Option<AccountBalance>, ParseError> {
        let asset = req_string(raw, "currency", &["currency"])?.to_ascii_uppercase();
        let wallet = req_f64(raw, "balance", &["balance", "equity"])?;
        let available = opt_f64(raw, &["available_funds", "available_withdrawal_funds"])
            .unwrap_or(wallet);
        Ok(AccountBalance::from_wallet_available(
            self.venue(),
            asset,
            wallet,
            available,
            opt_timestamp(raw, &["creation_timestamp", "timestamp"]).unwrap_or_else(now_micros),
        ))
    }

    fn parse_trade(&self, raw: &Value) -> Result<Trade, ParseError> {
        Ok(Trade {
            venue: self.venue(),
            symbol: req_string(raw, "instrument_name", &["instrument_name"])?,
            trade_id: req_string(raw, "trade_id", &["trade_id"])?,
            price: req_f64(raw, "price", &["price"])?,
            qty: req_f64(raw, "amount", &["amount"])?,
            side: opt_string(raw, &["direction"]).and_then(|d| OrderSide::from_wire(&d)),
            timestamp_us: opt_timestamp(raw, &["timestamp"]).unwrap_or_else(now_micros),
        })
    }

    fn parse_orderbook(&self, raw: &Value) -> Result<OrderBookSnapshot, ParseError> {
        Ok(OrderBookSnapshot {
            venue: self.venue(),
            symbol: req_string(raw, "instrument_name", &["instrument_name"])?,
            bids: price_levels(raw, "bids")?,
            asks: price_levels(raw, "asks")?,
            sequence: raw.get("change_id").and_then(Value::as_u64),
            timestamp_us: opt_timestamp(raw, &["timestamp"]).unwrap_or_else(now_micros),
        })
    }

    fn route(&self, channel: ChannelKind, raw: &Value) -> Result<Vec<CanonicalEvent>, ParseError> {
        match raw.get("method").and_then(Value::as_str) {
            Some("subscription") => {
                let params = raw.get("params").ok_or(ParseError::MissingField("params"))?;
                self.notification(params)
            }
            Some("heartbeat") => Ok(Vec::new()),
            Some(other) => {
                tracing::debug!(venue = %self.venue(), %channel, method = other, "Ignoring method");
                Ok(Vec::new())
            }
            None if raw.get("result").is_some() || raw.get("error").is_some() => {
                self.response(raw)
            }
            None => Err(ParseError::Unsupported("frame without method or result".into())),
        }
    }

    fn build_auth(
        &self,
        credentials: &SessionCredentials,
        request: &AuthRequest<'_>,
    ) -> GatewayResult<SignedRequest> {
        let query = encode_query(&request.query.params);
        let body = request.body.map(str::to_string);
        if !request.query.signed {
            return Ok(SignedRequest {
                headers: Vec::new(),
                query,
                body,
            });
        }
        let SessionCredentials::ApiKey {
            api_key,
            api_secret,
        } = credentials
        else {
            return Err(GatewayError::authentication(
                "deribit requires client credentials",
            ));
        };

        let uri = if query.is_empty() {
            request.query.path.clone()
        } else {
            format!("{}?{query}", request.query.path)
        };
        let header = deribit_authorization(
            api_key,
            api_secret,
            request.timestamp_ms,
            request.nonce,
            request.query.method.as_str(),
            &uri,
            request.body.unwrap_or_default(),
        );
        Ok(SignedRequest {
            headers: vec![("Authorization".into(), header)],
            query,
            body,
        })
    }

    fn login_frame(
        &self,
        credentials: &SessionCredentials,
        channel: ChannelKind,
        id: u64,
    ) -> Option<String> {
        if !channel.requires_auth() {
            return None;
        }
        Self::auth_params(credentials).map(|params| Self::rpc(id, "public/auth", params))
    }

    fn subscription_channel(&self, stream: StreamKind, symbol: &str) -> Option<String> {
        Some(match stream {
            StreamKind::Trades => format!("trades.{symbol}.100ms"),
            StreamKind::OrderBook => format!("book.{symbol}.none.10.100ms"),
            StreamKind::Orders => format!("user.orders.{symbol}.raw"),
            StreamKind::Positions => format!("user.changes.{symbol}.raw"),
            StreamKind::Balances => {
                let currency = symbol.split(['-', '_']).next().unwrap_or(symbol);
                format!("user.portfolio.{}", currency.to_ascii_lowercase())
            }
        })
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
        let scope = if channels.iter().any(|c| c.starts_with("user.")) {
            "private"
        } else {
            "public"
        };
        let verb = match action {
            SubscriptionAction::Subscribe => "subscribe",
            SubscriptionAction::Unsubscribe => "unsubscribe",
        };
        vec![Self::rpc(
            id,
            &format!("{scope}/{verb}"),
            json!({"channels": channels}),
        )]
    }

    fn heartbeat(&self, id: u64) -> Option<String> {
        Some(Self::rpc(id, "public/test", json!({})))
    }

    fn heartbeat_reply(&self, text: &str) -> Option<String> {
        // Cheap pre-check before parsing every frame.
        if !text.contains("test_request") {
            return None;
        }
        let raw: Value = serde_json::from_str(text).ok()?;
        let is_request = raw.get("method").and_then(Value::as_str) == Some("heartbeat")
            && raw.pointer("/params/type").and_then(Value::as_str) == Some("test_request");
        is_request.then(|| Self::rpc(0, "public/test", json!({})))
    }

    fn session_refresh_frame(&self, credentials: &SessionCredentials, id: u64) -> Option<String> {
        Self::auth_params(credentials).map(|params| Self::rpc(id, "public/auth", params))
    }

    fn build_order(&self, request: &OrderRequest, id: u64) -> GatewayResult<OutboundRequest> {
        let method = match request.side {
            OrderSide::Buy => "private/buy",
            OrderSide::Sell => "private/sell",
        };
        let mut params = json!({
            "instrument_name": request.symbol,
            "amount": request.quantity,
            "label": request.cl_ord_id.as_str(),
        });
        match request.order_type {
            OrderType::Market => params["type"] = json!("market"),
            OrderType::Limit => {
                params["type"] = json!("limit");
                params["price"] = json!(request.price);
            }
            OrderType::PostOnly => {
                params["type"] = json!("limit");
                params["price"] = json!(request.price);
                params["post_only"] = json!(true);
                params["reject_post_only"] = json!(true);
            }
        }
        self.track(id, &request.cl_ord_id, &request.symbol);
        Ok(OutboundRequest::Ws(Self::rpc(id, method, params)))
    }

    fn build_cancel(&self, order: &Order, id: u64) -> GatewayResult<OutboundRequest> {
        let currency = order.symbol.split('-').next().unwrap_or(&order.symbol);
        Ok(OutboundRequest::Ws(Self::rpc(
            id,
            "private/cancel_by_label",
            json!({"label": order.cl_ord_id.as_str(), "currency": currency}),
        )))
    }

    fn build_modify(
        &self,
        order: &Order,
        new_quantity: f64,
        new_price: Option<f64>,
        id: u64,
    ) -> GatewayResult<OutboundRequest> {
        if !order.order_type.requires_limit_price() {
            return Err(GatewayError::validation("deribit can only edit limit orders")
                .with_context("cl_ord_id", order.cl_ord_id.as_str()));
        }
        Ok(OutboundRequest::Ws(Self::rpc(
            id,
            "private/edit_by_label",
            json!({
                "label": order.cl_ord_id.as_str(),
                "instrument_name": order.symbol,
                "amount": new_quantity,
                "price": new_price.unwrap_or(order.price),
            }),
        )))
    }

    fn reconciliation_query(&self, kind: SnapshotKind) -> RestQuery {
        match kind {
            SnapshotKind::OpenOrders => RestQuery::get("/api/v2/private/get_open_orders"),
            SnapshotKind::Positions => {
                RestQuery::get("/api/v2/private/get_positions").param("currency", "any")
            }
            SnapshotKind::Balances => RestQuery::get("/api/v2/private/get_account_summaries"),
        }
        .signed()
    }

    fn parse_snapshot(
        &self,
        kind: SnapshotKind,
        body: &Value,
    ) -> Result<Vec<CanonicalEvent>, ParseError> {
        let result = body.get("result").unwrap_or(body);
        match kind {
            SnapshotKind::OpenOrders => self.orders_in(result),
            SnapshotKind::Positions => self.positions_in(result),
            SnapshotKind::Balances => self.balances_in(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order_execution::PositionSide;
    use test_case::test_case;

    fn order(state: &str, filled: f64) -> Value {
        json!({
            "order_id": "ETH-584849853", "label": "cl-7", "instrument_name": "ETH-PERPETUAL",
            "direction": "sell", "order_state": state, "order_type": "limit",
            "amount": 40.0, "filled_amount": filled, "average_price": if filled > 0.0 { 2000.0 } else { 0.0 },
            "price": 2000.0, "last_update_timestamp": 1_640_995_200_000_i64,
            "creation_timestamp": 1_640_995_100_000_i64
        })
    }

    fn notification(channel: &str, data: Value) -> String {
        json!({"jsonrpc": "2.0", "method": "subscription", "params": {"channel": channel, "data": data}})
            .to_string()
    }

    #[test_case("open", 0.0, OrderEventKind::Ack)]
    #[test_case("untriggered", 0.0, OrderEventKind::Ack)]
    #[test_case("open", 10.0, OrderEventKind::Fill)]
    #[test_case("filled", 40.0, OrderEventKind::Fill)]
    #[test_case("cancelled", 0.0, OrderEventKind::Cancel)]
    #[test_case("rejected", 0.0, OrderEventKind::Reject)]
    fn state_mapping(state: &str, filled: f64, expected: OrderEventKind) {
        let event = DeribitAdapter::new().parse_order_event(&order(state, filled)).unwrap();
        assert_eq!(event.kind, expected);
        assert_eq!(event.cumulative_qty, Some(filled));
    }

    #[test]
    fn order_notification() {
        let adapter = DeribitAdapter::new();
        let text = notification("user.orders.ETH-PERPETUAL.raw", order("open", 10.0));
        let events = adapter.decode(ChannelKind::Private, &text);
        let CanonicalEvent::Order(event) = &events[0] else {
            panic!("expected order");
        };
        assert_eq!(event.cl_ord_id.as_str(), "cl-7");
        assert_eq!(event.side, Some(OrderSide::Sell));
        assert_eq!(event.avg_price, Some(2000.0));
        assert_eq!(event.timestamp_us, 1_640_995_200_000_000);
    }

    #[test]
    fn unlabelled_order_falls_back_to_order_id() {
        let mut raw = order("open", 0.0);
        raw.as_object_mut().unwrap().remove("label");
        let event = DeribitAdapter::new().parse_order_event(&raw).unwrap();
        assert_eq!(event.cl_ord_id.as_str(), "ETH-584849853");
    }

    #[test]
    fn market_price_string_is_tolerated() {
        let mut raw = order("filled", 40.0);
        raw["price"] = json!("market_price");
        let event = DeribitAdapter::new().parse_order_event(&raw).unwrap();
        assert_eq!(event.order_price, None);
    }

    #[test]
    fn trades_and_book() {
        let adapter = DeribitAdapter::new();
        let trades = notification(
            "trades.BTC-PERPETUAL.100ms",
            json!([
                {"trade_id": "1", "instrument_name": "BTC-PERPETUAL", "price": 50000.0,
                 "amount": 10.0, "direction": "buy", "timestamp": 1_640_995_200_000_i64},
                {"trade_id": "2", "instrument_name": "BTC-PERPETUAL", "price": 50001.0,
                 "amount": 20.0, "direction": "sell", "timestamp": 1_640_995_200_001_i64}
            ]),
        );
        assert_eq!(adapter.decode(ChannelKind::Public, &trades).len(), 2);

        let book = notification(
            "book.BTC-PERPETUAL.100ms",
            json!({"type": "change", "timestamp": 1, "instrument_name": "BTC-PERPETUAL",
                   "change_id": 42, "bids": [["new", 49999.5, 100.0]], "asks": [["delete", 50000.5, 0.0]]}),
        );
        let events = adapter.decode(ChannelKind::Public, &book);
        let CanonicalEvent::OrderBook(snapshot) = &events[0] else {
            panic!("expected book");
        };
        assert_eq!(snapshot.sequence, Some(42));
        assert_eq!(snapshot.bids[0].price, 49_999.5);
        assert_eq!(snapshot.asks[0].qty, 0.0);
    }

    #[test]
    fn changes_carry_orders_and_positions() {
        let adapter = DeribitAdapter::new();
        let text = notification(
            "user.changes.ETH-PERPETUAL.raw",
            json!({
                "instrument_name": "ETH-PERPETUAL",
                "orders": [order("filled", 40.0)],
                "trades": [],
                "positions": [{"instrument_name": "ETH-PERPETUAL", "size": -40.0, "direction": "sell",
                               "average_price": 2000.0, "floating_profit_loss": 0.1}]
            }),
        );
        let events = adapter.decode(ChannelKind::Private, &text);
        assert_eq!(events.len(), 2);
        let CanonicalEvent::Position(position) = &events[1] else {
            panic!("expected position");
        };
        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.qty, 40.0);
    }

    #[test]
    fn portfolio_balance() {
        let adapter = DeribitAdapter::new();
        let text = notification(
            "user.portfolio.btc",
            json!({"currency": "BTC", "balance": 2.0, "available_funds": 1.5, "equity": 2.1}),
        );
        let events = adapter.decode(ChannelKind::Private, &text);
        let CanonicalEvent::Balance(balance) = &events[0] else {
            panic!("expected balance");
        };
        assert_eq!(balance.asset, "BTC");
        assert_eq!(balance.locked, 0.5);
    }

    #[test]
    fn heartbeat_request_is_answered() {
        let adapter = DeribitAdapter::new();
        let request = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"test_request"}}"#;
        let reply = adapter.heartbeat_reply(request).unwrap();
        assert!(reply.contains("public/test"));

        let plain = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"heartbeat"}}"#;
        assert!(adapter.heartbeat_reply(plain).is_none());
        assert!(adapter.decode(ChannelKind::Public, plain).is_empty());
    }

    #[test]
    fn login_only_on_private_channel() {
        let adapter = DeribitAdapter::new();
        let creds = SessionCredentials::api_key("client", "secret");
        assert!(adapter.login_frame(&creds, ChannelKind::Public, 1).is_none());
        let login: Value =
            serde_json::from_str(&adapter.login_frame(&creds, ChannelKind::Private, 1).unwrap()).unwrap();
        assert_eq!(login["method"], "public/auth");
        assert_eq!(login["params"]["grant_type"], "client_credentials");
        assert!(adapter.session_refresh_frame(&SessionCredentials::None, 2).is_none());
    }

    #[test]
    fn subscribe_scope_follows_channels() {
        let adapter = DeribitAdapter::new();
        let public = adapter.build_subscription(StreamKind::Trades, "BTC-PERPETUAL", 1).unwrap();
        assert!(public.contains("public/subscribe"));
        let private = adapter
            .build_subscription_request(
                &["user.orders.BTC-PERPETUAL.raw".into(), "trades.BTC-PERPETUAL.100ms".into()],
                SubscriptionAction::Unsubscribe,
                2,
            )
            .remove(0);
        assert!(private.contains("private/unsubscribe"));
        assert_eq!(
            adapter.subscription_channel(StreamKind::Balances, "BTC-PERPETUAL").unwrap(),
            "user.portfolio.btc"
        );
    }

    fn request(order_type: OrderType) -> OrderRequest {
        OrderRequest {
            cl_ord_id: ClOrdId::new("cl-1"),
            venue: Venue::Deribit,
            symbol: "BTC-PERPETUAL".into(),
            side: OrderSide::Buy,
            order_type,
            quantity: 10.0,
            price: 50_000.0,
        }
    }

    #[test]
    fn post_only_order_envelope() {
        let OutboundRequest::Ws(text) = DeribitAdapter::new().build_order(&request(OrderType::PostOnly), 5).unwrap() else {
            panic!("expected ws");
        };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["method"], "private/buy");
        assert_eq!(parsed["id"], 5);
        assert_eq!(parsed["params"]["label"], "cl-1");
        assert_eq!(parsed["params"]["post_only"], true);
        assert_eq!(parsed["params"]["price"], 50_000.0);
    }

    #[test]
    fn error_response_rejects_tracked_order() {
        let adapter = DeribitAdapter::new();
        adapter.build_order(&request(OrderType::Limit), 9).unwrap();
        let error = r#"{"jsonrpc":"2.0","id":9,"error":{"code":10009,"message":"not_enough_funds"}}"#;
        let events = adapter.decode(ChannelKind::Private, error);
        let CanonicalEvent::Order(event) = &events[0] else {
            panic!("expected reject");
        };
        assert_eq!(event.kind, OrderEventKind::Reject);
        assert_eq!(event.reason.as_deref(), Some("not_enough_funds"));
        assert!(adapter.decode(ChannelKind::Private, error).is_empty());
    }

    #[test]
    fn order_response_is_parsed() {
        let adapter = DeribitAdapter::new();
        let text = json!({"jsonrpc": "2.0", "id": 3, "result": {"order": order("open", 0.0), "trades": []}})
            .to_string();
        assert_eq!(adapter.decode(ChannelKind::Private, &text).len(), 1);
        let auth = r#"{"jsonrpc":"2.0","id":1,"result":{"access_token":"x","expires_in":900}}"#;
        assert!(adapter.decode(ChannelKind::Private, auth).is_empty());
    }

    #[test]
    fn edit_and_cancel_use_label() {
        let adapter = DeribitAdapter::new();
        let order = Order::from_request(request(OrderType::Limit), 0);
        let OutboundRequest::Ws(cancel) = adapter.build_cancel(&order, 1).unwrap() else {
            panic!("expected ws");
        };
        assert!(cancel.contains("private/cancel_by_label"));
        assert!(cancel.contains("\"currency\":\"BTC\""));
        let OutboundRequest::Ws(edit) = adapter.build_modify(&order, 20.0, Some(49_000.0), 2).unwrap() else {
            panic!("expected ws");
        };
        let parsed: Value = serde_json::from_str(&edit).unwrap();
        assert_eq!(parsed["params"]["amount"], 20.0);
        assert_eq!(parsed["params"]["price"], 49_000.0);
    }

    #[test]
    fn signed_rest_header() {
        let query = DeribitAdapter::new().reconciliation_query(SnapshotKind::Positions);
        let signed = DeribitAdapter::new()
            .build_auth(
                &SessionCredentials::api_key("id", "secret"),
                &AuthRequest { query: &query, body: None, timestamp_ms: 5, nonce: "abc" },
            )
            .unwrap();
        assert_eq!(signed.query, "currency=any");
        assert!(signed.headers[0].1.starts_with("deri-hmac-sha256 id=id,ts=5,sig="));
    }

    #[test]
    fn snapshots_unwrap_result() {
        let adapter = DeribitAdapter::new();
        let summaries = json!({"jsonrpc": "2.0", "result": {"summaries": [
            {"currency": "BTC", "balance": 1.0, "available_funds": 0.4},
            {"currency": "ETH", "balance": 0.0, "available_funds": 0.0}
        ]}});
        assert_eq!(adapter.parse_snapshot(SnapshotKind::Balances, &summaries).unwrap().len(), 1);

        let orders = json!({"result": [order("open", 0.0), order("open", 5.0)]});
        assert_eq!(adapter.parse_snapshot(SnapshotKind::OpenOrders, &orders).unwrap().len(), 2);

        let positions = json!({"result": [
            {"instrument_name": "BTC-PERPETUAL", "size": 0.0, "direction": "zero", "average_price": 0.0}
        ]});
        assert!(adapter.parse_snapshot(SnapshotKind::Positions, &positions).unwrap().is_empty());
    }
}
