//! Exchange Gateway Binary
//!
//! Connects to every enabled venue, keeps the sessions alive and tracks
//! order state until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin exchange-gateway -- gateway.yaml
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: config file path when no argument is given (default: gateway.yaml)
//! - `RUST_LOG`: log level (default: info)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: tracing export
//!
//! Config values may reference the environment as `${VAR}` or `${VAR:-default}`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use exchange_gateway::application::ports::{
    ChannelKind, EventPublisherPort, ReconciliationPort, SessionEvent, SessionRefresher,
    SnapshotProtocol,
};
use exchange_gateway::application::services::{
    DEFAULT_UPDATE_CAPACITY, OrderLifecycleCoordinator, VenueLink,
};
use exchange_gateway::config::{DEFAULT_CONFIG_PATH, ExchangeConfig, GatewayConfig, load_config};
use exchange_gateway::domain::shared::{
    SessionCredentials, SharedCredentials, Venue, shared_credentials,
};
use exchange_gateway::infrastructure::http::VenueRestClient;
use exchange_gateway::infrastructure::messaging::{BusMessage, SerializedChannelPublisher};
use exchange_gateway::infrastructure::venues::{
    BinanceAdapter, DeribitAdapter, ExchangeProtocolAdapter, GrvtAdapter, GrvtEnvelope,
    VenueAdapter, VenueOrderGateway,
};
use exchange_gateway::infrastructure::websocket::ConnectionSessionManager;
use exchange_gateway::observability::{init_metrics, init_telemetry};
use exchange_gateway::resilience::ResilienceManager;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Session notification buffer shared by every venue.
const SESSION_EVENT_CAPACITY: usize = 4096;

/// One connected venue.
struct VenueRuntime {
    venue: Venue,
    public: Arc<ConnectionSessionManager>,
    private: Option<Arc<ConnectionSessionManager>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(Some(&path)).with_context(|| format!("loading {path}"))?;

    let _telemetry = init_telemetry(&config.observability.telemetry_config());
    tracing::info!(config = %path, "Starting exchange gateway");

    if let Some(metrics) = config.observability.metrics_config() {
        init_metrics(&metrics).context("starting metrics exporter")?;
        tracing::info!(addr = %metrics.listen_addr, "Prometheus exporter listening");
    }

    let resilience = create_resilience(&config);
    let (publisher, bus) = SerializedChannelPublisher::channel(DEFAULT_UPDATE_CAPACITY);
    let publisher: Arc<dyn EventPublisherPort> = Arc::new(publisher);
    let coordinator = Arc::new(OrderLifecycleCoordinator::new(
        Arc::clone(&resilience),
        publisher,
    ));

    let shutdown = CancellationToken::new();
    let bus_handle = spawn_bus_drain(bus, shutdown.clone());
    let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_CAPACITY);
    let pump = tokio::spawn(Arc::clone(&coordinator).run(events_rx, shutdown.clone()));

    let mut runtimes = Vec::new();
    for exchange in config.enabled_exchanges() {
        match start_venue(exchange, &coordinator, &resilience, &events_tx).await {
            Ok(runtime) => runtimes.push(runtime),
            Err(e) => {
                tracing::error!(venue = %exchange.venue, error = %format!("{e:#}"), "Venue failed to start");
            }
        }
    }
    drop(events_tx);

    if runtimes.is_empty() {
        shutdown.cancel();
        anyhow::bail!("no venue could be started");
    }
    tracing::info!(venues = runtimes.len(), "Exchange gateway ready");

    shutdown_signal().await;
    shutdown.cancel();

    let stop = async {
        for runtime in &runtimes {
            runtime.public.disconnect().await;
            if let Some(private) = &runtime.private {
                private.disconnect().await;
            }
            tracing::info!(venue = %runtime.venue, "Venue disconnected");
        }
        let _ = pump.await;
        let _ = bus_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, stop).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!(
        open_orders = coordinator.open_orders().len(),
        "Exchange gateway stopped"
    );
    Ok(())
}

/// Resilience manager with per-venue order and REST services.
fn create_resilience(config: &GatewayConfig) -> Arc<ResilienceManager> {
    let manager = ResilienceManager::new(config.resilience.to_resilience_config());
    for exchange in config.enabled_exchanges() {
        let limits = exchange.service_limits();
        manager.configure_service(&format!("{}.orders", exchange.venue), limits);
        manager.configure_service(&format!("{}.rest", exchange.venue), limits);
    }
    Arc::new(manager)
}

fn create_adapter(exchange: &ExchangeConfig) -> VenueAdapter {
    match exchange.venue {
        Venue::Binance => BinanceAdapter::new(exchange.recv_window_ms).into(),
        Venue::Deribit => DeribitAdapter::new().into(),
        Venue::Grvt => {
            let envelope = if exchange.compact {
                GrvtEnvelope::Lite
            } else {
                GrvtEnvelope::Full
            };
            let mut adapter = GrvtAdapter::new(exchange.sub_account_id.clone().unwrap_or_default())
                .with_envelope(envelope);
            if let Some(url) = &exchange.auth_url {
                adapter = adapter.with_auth_url(url.clone());
            }
            adapter.into()
        }
    }
}

/// Build, connect and register one venue.
async fn start_venue(
    exchange: &ExchangeConfig,
    coordinator: &Arc<OrderLifecycleCoordinator>,
    resilience: &Arc<ResilienceManager>,
    events: &mpsc::Sender<SessionEvent>,
) -> anyhow::Result<VenueRuntime> {
    let venue = exchange.venue;
    let adapter = Arc::new(create_adapter(exchange));
    let credentials = shared_credentials(exchange.session_credentials());
    let rest = Arc::new(VenueRestClient::new(
        Arc::clone(&adapter),
        exchange.rest_base_url(),
        Arc::clone(&credentials),
        exchange.request_timeout(),
    )?);

    let public = Arc::new(
        ConnectionSessionManager::builder(Arc::clone(&adapter), ChannelKind::Public)
            .config(exchange.session_config())
            .resilience(Arc::clone(resilience))
            .build(events.clone())?,
    );
    public
        .connect(&exchange.public_url())
        .await
        .with_context(|| format!("{venue} public connect"))?;

    let private = if exchange.has_private_access() {
        let url = prepare_private(exchange, &rest, &credentials).await?;
        let session = Arc::new(
            ConnectionSessionManager::builder(Arc::clone(&adapter), ChannelKind::Private)
                .config(exchange.session_config())
                .credentials(Arc::clone(&credentials))
                .resilience(Arc::clone(resilience))
                .refresher(Arc::clone(&rest) as Arc<dyn SessionRefresher>)
                .build(events.clone())?,
        );
        session
            .connect(&url)
            .await
            .with_context(|| format!("{venue} private connect"))?;
        Some(session)
    } else {
        tracing::info!(venue = %venue, "No credentials, public data only");
        None
    };

    for subscription in &exchange.subscriptions {
        let Some(channel) = adapter.subscription_channel(subscription.stream, &subscription.symbol)
        else {
            tracing::warn!(
                venue = %venue,
                stream = ?subscription.stream,
                symbol = %subscription.symbol,
                "Stream not available on this venue"
            );
            continue;
        };
        let session = if subscription.stream.is_private() {
            private.as_ref()
        } else {
            Some(&public)
        };
        if let Some(session) = session {
            session.subscribe(&channel).await?;
        }
    }

    let mut gateway = VenueOrderGateway::new(Arc::clone(&adapter))
        .with_rest(Arc::clone(&rest) as Arc<dyn ReconciliationPort>);
    if let Some(session) = &private {
        gateway = gateway.with_session(Arc::clone(session));
    }
    coordinator.register_venue(
        venue,
        VenueLink {
            orders: Arc::new(gateway),
            rest: rest as Arc<dyn ReconciliationPort>,
            snapshots: adapter as Arc<dyn SnapshotProtocol>,
        },
    );
    if private.as_ref().is_some_and(|session| session.is_connected()) {
        coordinator.resync(venue).await;
    }
    tracing::info!(venue = %venue, private = private.is_some(), "Venue started");

    Ok(VenueRuntime {
        venue,
        public,
        private,
    })
}

/// Obtain the session artifact the private channel needs and return its URL.
async fn prepare_private(
    exchange: &ExchangeConfig,
    rest: &VenueRestClient,
    credentials: &SharedCredentials,
) -> anyhow::Result<String> {
    let url = exchange.private_url();
    match exchange.venue {
        Venue::Binance => {
            let key = rest
                .create_listen_key()
                .await
                .context("binance listen key")?
                .context("binance returned no listen key")?;
            Ok(format!("{}/{key}", url.trim_end_matches('/')))
        }
        Venue::Grvt => {
            let needs_login = matches!(
                &*credentials.read(),
                SessionCredentials::Cookie { session_cookie, .. } if session_cookie.is_empty()
            );
            if needs_login {
                rest.refresh().await.context("grvt login")?;
            }
            Ok(url)
        }
        Venue::Deribit => Ok(url),
    }
}

/// Drain the serialized event bus. Downstream delivery is out of process.
fn spawn_bus_drain(
    mut bus: mpsc::Receiver<BusMessage>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = bus.recv() => {
                    let Some(message) = next else { break };
                    tracing::trace!(topic = %message.topic, bytes = message.payload.len(), "Event published");
                }
            }
        }
    })
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
