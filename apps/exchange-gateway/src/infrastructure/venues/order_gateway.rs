//! Order entry for one venue.
//!
//! The adapter decides whether an instruction is a WebSocket frame or a REST
//! call; this gateway only carries it to the right transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{ExchangeProtocolAdapter, OutboundRequest, VenueAdapter};
use crate::application::ports::{OrderGatewayPort, ReconciliationPort};
use crate::domain::order_execution::{Order, OrderRequest};
use crate::domain::shared::Venue;
use crate::error::{GatewayError, GatewayResult};
use crate::infrastructure::websocket::ConnectionSessionManager;

/// [`OrderGatewayPort`] over a private session and a REST executor.
pub struct VenueOrderGateway {
    adapter: Arc<VenueAdapter>,
    session: Option<Arc<ConnectionSessionManager>>,
    rest: Option<Arc<dyn ReconciliationPort>>,
    fallback_id: AtomicU64,
}

impl VenueOrderGateway {
    /// Gateway with no transports attached yet.
    #[must_use]
    pub fn new(adapter: Arc<VenueAdapter>) -> Self {
        Self {
            adapter,
            session: None,
            rest: None,
            fallback_id: AtomicU64::new(1),
        }
    }

    /// Attach the private session used for WebSocket order entry.
    #[must_use]
    pub fn with_session(mut self, session: Arc<ConnectionSessionManager>) -> Self {
        self.session = Some(session);
        self
    }

    /// Attach the REST executor.
    #[must_use]
    pub fn with_rest(mut self, rest: Arc<dyn ReconciliationPort>) -> Self {
        self.rest = Some(rest);
        self
    }

    /// Request id shared with the session so responses can be matched.
    fn next_id(&self) -> u64 {
        self.session.as_ref().map_or_else(
            || self.fallback_id.fetch_add(1, Ordering::Relaxed),
            |s| s.next_request_id(),
        )
    }

    async fn dispatch(&self, request: OutboundRequest) -> GatewayResult<()> {
        match request {
            OutboundRequest::Ws(text) => {
                let session = self.session.as_ref().ok_or_else(|| {
                    GatewayError::system("no private session for websocket order entry")
                        .with_context("venue", self.adapter.venue().as_str())
                })?;
                session.send_text(text).await
            }
            OutboundRequest::Rest(query) => {
                let rest = self.rest.as_ref().ok_or_else(|| {
                    GatewayError::system("no rest client for order entry")
                        .with_context("venue", self.adapter.venue().as_str())
                })?;
                let body = rest.request(&query).await?;
                tracing::debug!(venue = %self.adapter.venue(), path = %query.path, %body, "Order call answered");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for VenueOrderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueOrderGateway")
            .field("venue", &self.adapter.venue())
            .field("session", &self.session.is_some())
            .field("rest", &self.rest.is_some())
            .finish()
    }
}

#[async_trait]
impl OrderGatewayPort for VenueOrderGateway {
    fn venue(&self) -> Venue {
        self.adapter.venue()
    }

    async fn send_order(&self, request: &OrderRequest) -> GatewayResult<()> {
        let outbound = self.adapter.build_order(request, self.next_id())?;
        self.dispatch(outbound).await
    }

    async fn cancel_order(&self, order: &Order) -> GatewayResult<()> {
        let outbound = self.adapter.build_cancel(order, self.next_id())?;
        self.dispatch(outbound).await
    }

    async fn modify_order(
        &self,
        order: &Order,
        new_quantity: f64,
        new_price: Option<f64>,
    ) -> GatewayResult<()> {
        let outbound = self
            .adapter
            .build_modify(order, new_quantity, new_price, self.next_id())?;
        self.dispatch(outbound).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::RestQuery;
    use crate::domain::order_execution::{OrderSide, OrderType};
    use crate::domain::shared::ClOrdId;
    use crate::error::ErrorKind;
    use crate::infrastructure::venues::{BinanceAdapter, DeribitAdapter};
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    #[derive(Default)]
    struct RecordingRest {
        calls: Mutex<Vec<RestQuery>>,
    }

    #[async_trait]
    impl ReconciliationPort for RecordingRest {
        async fn request(&self, query: &RestQuery) -> GatewayResult<Value> {
            self.calls.lock().push(query.clone());
            Ok(json!({"status": "NEW"}))
        }
    }

    fn request(venue: Venue) -> OrderRequest {
        OrderRequest {
            cl_ord_id: ClOrdId::new("1"),
            venue,
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: 1.0,
            price: 100.0,
        }
    }

    #[tokio::test]
    async fn rest_venue_goes_through_rest() {
        let rest = Arc::new(RecordingRest::default());
        let gateway = VenueOrderGateway::new(Arc::new(BinanceAdapter::default().into()))
            .with_rest(rest.clone());

        gateway.send_order(&request(Venue::Binance)).await.unwrap();
        let order = Order::from_request(request(Venue::Binance), 0);
        gateway.cancel_order(&order).await.unwrap();

        let calls = rest.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].path, "/fapi/v1/order");
    }

    #[tokio::test]
    async fn missing_transport_is_a_system_error() {
        let gateway = VenueOrderGateway::new(Arc::new(DeribitAdapter::default().into()));
        let err = gateway.send_order(&request(Venue::Deribit)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SystemError);

        let gateway = VenueOrderGateway::new(Arc::new(BinanceAdapter::default().into()));
        let err = gateway.send_order(&request(Venue::Binance)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SystemError);
    }

    #[tokio::test]
    async fn adapter_validation_is_propagated() {
        let rest = Arc::new(RecordingRest::default());
        let gateway = VenueOrderGateway::new(Arc::new(BinanceAdapter::default().into()))
            .with_rest(rest.clone());
        let mut market = Order::from_request(request(Venue::Binance), 0);
        market.order_type = OrderType::Market;
        let err = gateway.modify_order(&market, 2.0, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(rest.calls.lock().is_empty());
    }
}
