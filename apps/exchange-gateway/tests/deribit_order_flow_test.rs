//! Order lifecycle over a Deribit private session.
//!
//! Drives the coordinator, order gateway, session manager and REST client
//! together against an in-memory WebSocket peer and a wiremock REST server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use exchange_gateway::application::ports::{
    ChannelKind, NoOpEventPublisher, ReconciliationPort, SessionEvent, SnapshotProtocol,
};
use exchange_gateway::application::services::{OrderLifecycleCoordinator, VenueLink};
use exchange_gateway::domain::order_execution::{OrderRequest, OrderSide, OrderState, OrderType};
use exchange_gateway::domain::shared::{ClOrdId, SessionCredentials, Venue, shared_credentials};
use exchange_gateway::infrastructure::http::VenueRestClient;
use exchange_gateway::infrastructure::venues::{DeribitAdapter, VenueAdapter, VenueOrderGateway};
use exchange_gateway::infrastructure::websocket::{
    ConnectionSessionManager, FakePeer, FakeTransport, SessionConfig,
};
use exchange_gateway::resilience::ResilienceManager;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(2);
const URL: &str = "ws://fake/ws/api/v2";

fn quick_config() -> SessionConfig {
    SessionConfig {
        ping_interval: Duration::from_secs(30),
        pong_timeout: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(2),
        reconnect_attempts: 5,
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_delay: Duration::from_millis(20),
        backoff_multiplier: 1.0,
        reconnect_jitter: false,
        session_refresh_interval: None,
        ..SessionConfig::default()
    }
}

struct Harness {
    coordinator: Arc<OrderLifecycleCoordinator>,
    session: Arc<ConnectionSessionManager>,
    transport: FakeTransport,
    cancel: CancellationToken,
}

async fn harness(server: &MockServer) -> Harness {
    let adapter = Arc::new(VenueAdapter::from(DeribitAdapter::new()));
    let credentials = shared_credentials(SessionCredentials::api_key("client-id", "client-secret"));
    let transport = FakeTransport::new();
    let resilience = Arc::new(ResilienceManager::default());

    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(256);
    let session = Arc::new(
        ConnectionSessionManager::builder(Arc::clone(&adapter), ChannelKind::Private)
            .config(quick_config())
            .transport(Arc::new(transport.clone()))
            .credentials(Arc::clone(&credentials))
            .resilience(Arc::clone(&resilience))
            .build(events_tx)
            .unwrap(),
    );
    let rest = Arc::new(
        VenueRestClient::new(
            Arc::clone(&adapter),
            server.uri(),
            credentials,
            Duration::from_secs(2),
        )
        .unwrap(),
    );

    let coordinator = Arc::new(OrderLifecycleCoordinator::new(
        resilience,
        Arc::new(NoOpEventPublisher),
    ));
    let gateway = VenueOrderGateway::new(Arc::clone(&adapter))
        .with_session(Arc::clone(&session))
        .with_rest(Arc::clone(&rest) as Arc<dyn ReconciliationPort>);
    coordinator.register_venue(
        Venue::Deribit,
        VenueLink {
            orders: Arc::new(gateway),
            rest: rest as Arc<dyn ReconciliationPort>,
            snapshots: adapter as Arc<dyn SnapshotProtocol>,
        },
    );

    let cancel = CancellationToken::new();
    tokio::spawn(Arc::clone(&coordinator).run(events_rx, cancel.clone()));

    Harness {
        coordinator,
        session,
        transport,
        cancel,
    }
}

async fn connect(h: &Harness) -> FakePeer {
    let accept = {
        let transport = h.transport.clone();
        tokio::spawn(async move { transport.accept(WAIT).await })
    };
    h.session.connect(URL).await.unwrap();
    let mut peer = accept.await.unwrap().expect("client connected");
    let login = peer.next_text(WAIT).await.expect("login frame");
    assert!(login.contains("public/auth"));
    assert!(login.contains("client-id"));
    peer
}

async fn wait_for_state(coordinator: &OrderLifecycleCoordinator, id: &str, state: OrderState) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let current = coordinator.query_order(&ClOrdId::new(id)).map(|info| info.state);
        if current == Some(state) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "order {id} stuck in {current:?}, expected {state}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn btc_limit(id: &str) -> OrderRequest {
    OrderRequest {
        cl_ord_id: ClOrdId::new(id),
        venue: Venue::Deribit,
        symbol: "BTC-PERPETUAL".into(),
        side: OrderSide::Buy,
        order_type: OrderType::Limit,
        quantity: 10.0,
        price: 50_000.0,
    }
}

fn deribit_order(label: &str, state: &str, filled: f64) -> Value {
    json!({
        "order_id": format!("BTC-{label}"),
        "label": label,
        "order_state": state,
        "filled_amount": filled,
        "average_price": if filled > 0.0 { 50_000.0 } else { 0.0 },
        "instrument_name": "BTC-PERPETUAL",
        "amount": 10.0,
        "price": 50_000.0,
        "direction": "buy",
        "last_update_timestamp": 1_700_000_000_000_i64
    })
}

#[tokio::test]
async fn order_is_acknowledged_then_filled_over_the_private_session() {
    let server = MockServer::start().await;
    let h = harness(&server).await;
    let mut peer = connect(&h).await;

    h.coordinator.send_order(btc_limit("ord-1")).await.unwrap();
    assert_eq!(
        h.coordinator.query_order(&ClOrdId::new("ord-1")).unwrap().state,
        OrderState::Pending
    );

    let sent: Value = serde_json::from_str(&peer.next_text(WAIT).await.unwrap()).unwrap();
    assert_eq!(sent["method"], "private/buy");
    assert_eq!(sent["params"]["label"], "ord-1");
    assert_eq!(sent["params"]["type"], "limit");

    let response = json!({
        "jsonrpc": "2.0",
        "id": sent["id"],
        "result": {"order": deribit_order("ord-1", "open", 0.0), "trades": []}
    });
    peer.send_text(&response.to_string()).await.unwrap();
    wait_for_state(&h.coordinator, "ord-1", OrderState::Acknowledged).await;

    let notification = json!({
        "jsonrpc": "2.0",
        "method": "subscription",
        "params": {
            "channel": "user.orders.BTC-PERPETUAL.raw",
            "data": deribit_order("ord-1", "filled", 10.0)
        }
    });
    peer.send_text(&notification.to_string()).await.unwrap();
    wait_for_state(&h.coordinator, "ord-1", OrderState::Filled).await;

    let info = h.coordinator.query_order(&ClOrdId::new("ord-1")).unwrap();
    assert_eq!(info.filled_qty, 10.0);
    assert_eq!(info.avg_fill_price, 50_000.0);
    assert_eq!(
        info.order.venue_order_id.as_ref().map(|id| id.as_str().to_string()),
        Some("BTC-ord-1".to_string())
    );
    assert!(h.coordinator.open_orders().is_empty());

    h.cancel.cancel();
    h.session.disconnect().await;
}

#[tokio::test]
async fn venue_error_response_rejects_the_order() {
    let server = MockServer::start().await;
    let h = harness(&server).await;
    let mut peer = connect(&h).await;

    h.coordinator.send_order(btc_limit("ord-err")).await.unwrap();
    let sent: Value = serde_json::from_str(&peer.next_text(WAIT).await.unwrap()).unwrap();

    let response = json!({
        "jsonrpc": "2.0",
        "id": sent["id"],
        "error": {"code": 10009, "message": "not_enough_funds"}
    });
    peer.send_text(&response.to_string()).await.unwrap();
    wait_for_state(&h.coordinator, "ord-err", OrderState::Rejected).await;

    let info = h.coordinator.query_order(&ClOrdId::new("ord-err")).unwrap();
    assert_eq!(info.reason.as_deref(), Some("not_enough_funds"));

    h.cancel.cancel();
    h.session.disconnect().await;
}

#[tokio::test]
async fn cancel_goes_out_by_label() {
    let server = MockServer::start().await;
    let h = harness(&server).await;
    let mut peer = connect(&h).await;

    h.coordinator.send_order(btc_limit("ord-c")).await.unwrap();
    let sent: Value = serde_json::from_str(&peer.next_text(WAIT).await.unwrap()).unwrap();
    let ack = json!({
        "jsonrpc": "2.0",
        "id": sent["id"],
        "result": {"order": deribit_order("ord-c", "open", 0.0)}
    });
    peer.send_text(&ack.to_string()).await.unwrap();
    wait_for_state(&h.coordinator, "ord-c", OrderState::Acknowledged).await;

    h.coordinator.cancel_order(&ClOrdId::new("ord-c")).await.unwrap();
    let cancel: Value = serde_json::from_str(&peer.next_text(WAIT).await.unwrap()).unwrap();
    assert_eq!(cancel["method"], "private/cancel_by_label");
    assert_eq!(cancel["params"]["currency"], "BTC");

    let cancelled = json!({
        "jsonrpc": "2.0",
        "method": "subscription",
        "params": {
            "channel": "user.orders.BTC-PERPETUAL.raw",
            "data": deribit_order("ord-c", "cancelled", 0.0)
        }
    });
    peer.send_text(&cancelled.to_string()).await.unwrap();
    wait_for_state(&h.coordinator, "ord-c", OrderState::Cancelled).await;

    h.cancel.cancel();
    h.session.disconnect().await;
}

async fn mount_snapshots(server: &MockServer, open_orders: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/v2/private/get_open_orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": open_orders
        })))
        .expect(1..)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/private/get_positions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "result": []})),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/private/get_account_summaries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": {"summaries": []}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn startup_resync_seeds_orders_live_before_restart() {
    let server = MockServer::start().await;
    mount_snapshots(
        &server,
        vec![
            deribit_order("resting-1", "open", 0.0),
            deribit_order("resting-2", "open", 4.0),
        ],
    )
    .await;

    let h = harness(&server).await;
    let _peer = connect(&h).await;

    let report = h.coordinator.resync(Venue::Deribit).await.expect("resync report");
    assert_eq!(report.open_orders, 2);
    assert!(report.errors.is_empty());

    let first = h.coordinator.query_order(&ClOrdId::new("resting-1")).unwrap();
    assert_eq!(first.state, OrderState::Acknowledged);
    let second = h.coordinator.query_order(&ClOrdId::new("resting-2")).unwrap();
    assert_eq!(second.state, OrderState::PartiallyFilled);
    assert_eq!(second.filled_qty, 4.0);
    assert_eq!(h.coordinator.open_orders().len(), 2);

    h.cancel.cancel();
    h.session.disconnect().await;
}

#[tokio::test]
async fn startup_resync_survives_unreachable_snapshots() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    let report = h.coordinator.resync(Venue::Deribit).await.expect("resync report");
    assert_eq!(report.open_orders, 0);
    assert_eq!(report.errors.len(), 3);
    assert!(h.coordinator.open_orders().is_empty());

    h.cancel.cancel();
}

#[tokio::test]
async fn reconnect_reconciles_open_orders_from_rest() {
    let server = MockServer::start().await;
    mount_snapshots(&server, vec![deribit_order("external-1", "open", 0.0)]).await;

    let h = harness(&server).await;
    let peer = connect(&h).await;
    assert!(h.coordinator.query_order(&ClOrdId::new("external-1")).is_none());

    let accept = {
        let transport = h.transport.clone();
        tokio::spawn(async move { transport.accept(WAIT).await })
    };
    drop(peer);
    let mut second = accept.await.unwrap().expect("client reconnected");
    let login = second.next_text(WAIT).await.unwrap();
    assert!(login.contains("public/auth"));

    wait_for_state(&h.coordinator, "external-1", OrderState::Acknowledged).await;
    let info = h.coordinator.query_order(&ClOrdId::new("external-1")).unwrap();
    assert_eq!(info.order.symbol, "BTC-PERPETUAL");
    assert_eq!(info.order.quantity, 10.0);

    h.cancel.cancel();
    h.session.disconnect().await;
}
