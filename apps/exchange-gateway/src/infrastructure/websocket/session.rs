//! Connection Session Manager
//!
//! Owns one WebSocket connection to one venue channel: upgrade, login,
//! subscription bookkeeping and replay, keepalive, session-artifact renewal
//! and reconnect. Inbound text is decoded by the venue adapter and delivered
//! as [`SessionEvent::Record`]s on the consumer channel in wire order.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (fault) -> Connecting -> ...
//!                     |                                     |
//!                     +-> Error (first attempt failed)      +-> Error (attempts exhausted)
//! Connected -> Disconnecting -> Disconnected   (local disconnect)
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::frame::{Frame, FrameCodec, FrameError, Message, MessageAssembler, Role};
use super::handshake::client_handshake;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::ReconnectPolicy;
use super::transport::{BoxedStream, NetworkTransport, Transport};
use super::types::{ChannelKind, ConnectionState, Endpoint, SessionConfig, SessionError, SessionEvent};
use crate::application::ports::SessionRefresher;
use crate::domain::shared::{SessionCredentials, SharedCredentials, Venue, now_micros, shared_credentials};
use crate::error::{GatewayError, GatewayResult};
use crate::infrastructure::venues::{ExchangeProtocolAdapter, SubscriptionAction, VenueAdapter};
use crate::observability::metrics;
use crate::resilience::ResilienceManager;

/// Consecutive refresh failures before logging escalates to `error`.
const REFRESH_ESCALATION_THRESHOLD: u32 = 3;

type FrameSink = SplitSink<Framed<BoxedStream, FrameCodec>, Frame>;

/// Builder for [`ConnectionSessionManager`].
pub struct SessionBuilder {
    adapter: Arc<VenueAdapter>,
    channel: ChannelKind,
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<SharedCredentials>,
    resilience: Option<Arc<ResilienceManager>>,
    refresher: Option<Arc<dyn SessionRefresher>>,
}

impl SessionBuilder {
    /// Session configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Byte-stream transport; defaults to [`NetworkTransport`].
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Credentials shared with whatever renews them.
    #[must_use]
    pub fn credentials(mut self, credentials: SharedCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Resilience registry used for session refresh calls.
    #[must_use]
    pub fn resilience(mut self, resilience: Arc<ResilienceManager>) -> Self {
        self.resilience = Some(resilience);
        self
    }

    /// Out-of-band session renewal (listen-key keepalive, cookie re-login).
    #[must_use]
    pub fn refresher(mut self, refresher: Arc<dyn SessionRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Build the session; notifications go to `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the default network transport cannot be built.
    pub fn build(self, events: mpsc::Sender<SessionEvent>) -> GatewayResult<ConnectionSessionManager> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(NetworkTransport::new()?),
        };
        let venue = self.adapter.venue();
        let shared = Shared {
            venue,
            channel: self.channel,
            adapter: self.adapter,
            transport,
            credentials: self
                .credentials
                .unwrap_or_else(|| shared_credentials(SessionCredentials::None)),
            resilience: self.resilience.unwrap_or_default(),
            refresher: self.refresher,
            events,
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions: RwLock::new(BTreeSet::new()),
            outbound: RwLock::new(None),
            heartbeat: Arc::new(HeartbeatState::new()),
            next_request_id: AtomicU64::new(1),
            refresh_failures: AtomicU32::new(0),
            refresh_task: Mutex::new(None),
            config: self.config,
        };
        metrics::record_session_state(venue.as_str(), self.channel.as_str(), ConnectionState::Disconnected.code());

        Ok(ConnectionSessionManager {
            shared: Arc::new(shared),
            cancel: Mutex::new(CancellationToken::new()),
            worker: Mutex::new(None),
        })
    }
}

struct Shared {
    venue: Venue,
    channel: ChannelKind,
    config: SessionConfig,
    adapter: Arc<VenueAdapter>,
    transport: Arc<dyn Transport>,
    credentials: SharedCredentials,
    resilience: Arc<ResilienceManager>,
    refresher: Option<Arc<dyn SessionRefresher>>,
    events: mpsc::Sender<SessionEvent>,
    state: RwLock<ConnectionState>,
    subscriptions: RwLock<BTreeSet<String>>,
    outbound: RwLock<Option<mpsc::Sender<String>>>,
    heartbeat: Arc<HeartbeatState>,
    next_request_id: AtomicU64,
    refresh_failures: AtomicU32,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

/// One WebSocket connection to one venue channel.
pub struct ConnectionSessionManager {
    shared: Arc<Shared>,
    cancel: Mutex<CancellationToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSessionManager")
            .field("venue", &self.shared.venue)
            .field("channel", &self.shared.channel)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionSessionManager {
    /// Start building a session for `adapter`'s venue.
    #[must_use]
    pub fn builder(adapter: Arc<VenueAdapter>, channel: ChannelKind) -> SessionBuilder {
        SessionBuilder {
            adapter,
            channel,
            config: SessionConfig::default(),
            transport: None,
            credentials: None,
            resilience: None,
            refresher: None,
        }
    }

    /// Venue served.
    #[must_use]
    pub fn venue(&self) -> Venue {
        self.shared.venue
    }

    /// Channel served.
    #[must_use]
    pub fn channel(&self) -> ChannelKind {
        self.shared.channel
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Check if frames are flowing.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Active subscriptions, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions.read().iter().cloned().collect()
    }

    /// Credentials handle.
    #[must_use]
    pub fn credentials(&self) -> SharedCredentials {
        Arc::clone(&self.shared.credentials)
    }

    /// Allocate a request id for an outbound envelope.
    #[must_use]
    pub fn next_request_id(&self) -> u64 {
        self.shared.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open the connection and wait for the first upgrade to complete.
    ///
    /// Private channels refuse to start without complete credentials. A
    /// failed first attempt leaves the session in `Error`; faults after that
    /// are retried in the background.
    ///
    /// # Errors
    ///
    /// Returns an authentication error for missing credentials, a validation
    /// error for a bad URL and a network error when the attempt fails.
    pub async fn connect(&self, url: &str) -> GatewayResult<()> {
        let shared = &self.shared;
        if shared.channel.requires_auth() && !shared.credentials.read().is_complete() {
            tracing::warn!(venue = %shared.venue, "Private connect refused: credentials incomplete");
            return Err(GatewayError::from(SessionError::MissingCredentials {
                venue: shared.venue,
            })
            .with_context("venue", shared.venue.as_str()));
        }
        let endpoint = Endpoint::parse(url)?;

        if self.state().is_active() {
            tracing::debug!(venue = %shared.venue, channel = %shared.channel, "Already connected");
            return Ok(());
        }
        self.stop_worker().await;

        shared.set_state(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(run_worker(Arc::clone(shared), endpoint, ready_tx, cancel));
        *self.worker.lock() = Some(handle);

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::system("session worker exited before connecting")),
        }
    }

    /// Close the connection and stop reconnecting. No notification is
    /// delivered after this returns.
    pub async fn disconnect(&self) {
        if self.state() != ConnectionState::Disconnected {
            self.shared.set_state(ConnectionState::Disconnecting);
        }
        self.stop_worker().await;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn stop_worker(&self) {
        self.cancel.lock().cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(venue = %self.shared.venue, error = %e, "Session worker panicked");
            }
        }
        let refresh = self.shared.refresh_task.lock().take();
        if let Some(handle) = refresh {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::warn!(venue = %self.shared.venue, error = %e, "Session refresh panicked");
                }
            }
        }
    }

    /// Add a channel. It is sent now when connected and replayed after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty channel name.
    pub async fn subscribe(&self, channel: &str) -> GatewayResult<()> {
        self.change_subscription(channel, SubscriptionAction::Subscribe)
            .await
    }

    /// Remove a channel.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty channel name.
    pub async fn unsubscribe(&self, channel: &str) -> GatewayResult<()> {
        self.change_subscription(channel, SubscriptionAction::Unsubscribe)
            .await
    }

    async fn change_subscription(&self, channel: &str, action: SubscriptionAction) -> GatewayResult<()> {
        let channel = channel.trim();
        if channel.is_empty() {
            return Err(GatewayError::validation("subscription channel must not be empty"));
        }

        let changed = {
            let mut subs = self.shared.subscriptions.write();
            match action {
                SubscriptionAction::Subscribe => subs.insert(channel.to_string()),
                SubscriptionAction::Unsubscribe => subs.remove(channel),
            }
        };
        if !changed {
            tracing::debug!(venue = %self.shared.venue, channel, ?action, "Subscription unchanged");
            return Ok(());
        }
        tracing::info!(venue = %self.shared.venue, channel, ?action, "Subscription updated");

        if !self.is_connected() {
            return Ok(());
        }
        let id = self.next_request_id();
        let envelopes = self
            .shared
            .adapter
            .build_subscription_request(&[channel.to_string()], action, id);
        for envelope in envelopes {
            // A lost send is covered by replay on the next connection.
            if let Err(e) = self.send_text(envelope).await {
                tracing::warn!(venue = %self.shared.venue, channel, error = %e, "Subscription send failed");
            }
        }
        Ok(())
    }

    /// Queue a text frame on the live connection.
    ///
    /// # Errors
    ///
    /// Returns a network error when there is no live connection.
    pub async fn send_text(&self, text: String) -> GatewayResult<()> {
        let sender = self.shared.outbound.read().clone();
        let Some(sender) = sender else {
            return Err(SessionError::NotConnected.into());
        };
        sender
            .send(text)
            .await
            .map_err(|_| GatewayError::from(SessionError::NotConnected))
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(
                venue = %self.venue,
                channel = %self.channel,
                from = %previous,
                to = %state,
                "Session state changed"
            );
        }
        metrics::record_session_state(self.venue.as_str(), self.channel.as_str(), state.code());
    }

    /// Deliver a notification unless the session is being torn down.
    async fn emit(&self, event: SessionEvent, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    async fn establish(&self, endpoint: &Endpoint) -> Result<Framed<BoxedStream, FrameCodec>, SessionError> {
        let headers = self
            .adapter
            .handshake_headers(&self.credentials.read(), self.channel);
        let attempt = async {
            let mut stream = self.transport.connect(endpoint).await?;
            client_handshake(&mut stream, endpoint, &headers).await?;
            Ok(Framed::new(
                stream,
                FrameCodec::new(Role::Client, self.config.max_frame_size),
            ))
        };
        tokio::time::timeout(self.config.connect_timeout, attempt)
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "connect",
                timeout: self.config.connect_timeout,
            })?
    }

    async fn send_frame(&self, sink: &mut FrameSink, frame: Frame) -> Result<(), FrameError> {
        let len = frame.payload.len();
        sink.send(frame).await?;
        metrics::record_frame(self.venue.as_str(), self.channel.as_str(), "out", len);
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn handle_text(
        &self,
        text: &str,
        sink: &mut FrameSink,
        cancel: &CancellationToken,
    ) -> Result<(), FrameError> {
        if let Some(reply) = self.adapter.heartbeat_reply(text) {
            return self.send_frame(sink, Frame::text(reply)).await;
        }

        let received_at_us = now_micros();
        let started = Instant::now();
        let events = self.adapter.decode(self.channel, text);
        metrics::record_decode_latency(self.venue.as_str(), started.elapsed().as_secs_f64());

        for event in events {
            let record = SessionEvent::Record {
                channel: self.channel,
                event,
                received_at_us,
            };
            if !self.emit(record, cancel).await {
                break;
            }
        }
        Ok(())
    }

    /// Start an out-of-band renewal unless one is still running. The task
    /// stops with `cancel` and is joined by `disconnect`.
    fn spawn_refresh(self: &Arc<Self>, cancel: &CancellationToken) {
        let Some(refresher) = self.refresher.clone() else {
            return;
        };
        let mut slot = self.refresh_task.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!(venue = %self.venue, "Session refresh still in flight");
            return;
        }
        let shared = Arc::clone(self);
        let cancel = cancel.clone();
        *slot = Some(tokio::spawn(async move {
            let service = format!("{}.session", shared.venue);
            let result = tokio::select! {
                () = cancel.cancelled() => return,
                result = shared
                    .resilience
                    .execute(&service, "session_refresh", None, || refresher.refresh()) => result,
            };
            shared.record_refresh(&result);
        }));
    }

    fn record_refresh(&self, result: &GatewayResult<()>) {
        match result {
            Ok(()) => {
                self.refresh_failures.store(0, Ordering::Relaxed);
                metrics::record_session_refresh(self.venue.as_str(), true);
                tracing::debug!(venue = %self.venue, "Session refreshed");
            }
            Err(err) => {
                let failures = self.refresh_failures.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_session_refresh(self.venue.as_str(), false);
                if failures >= REFRESH_ESCALATION_THRESHOLD {
                    tracing::error!(
                        venue = %self.venue,
                        consecutive_failures = failures,
                        error = %err,
                        "Session refresh keeps failing"
                    );
                } else {
                    tracing::warn!(
                        venue = %self.venue,
                        consecutive_failures = failures,
                        error = %err,
                        "Session refresh failed"
                    );
                }
            }
        }
    }
}

enum ConnectionOutcome {
    Cancelled,
    Faulted(String),
}

async fn run_worker(
    shared: Arc<Shared>,
    endpoint: Endpoint,
    ready: oneshot::Sender<GatewayResult<()>>,
    cancel: CancellationToken,
) {
    let venue = shared.venue;
    let channel = shared.channel;
    let mut ready = Some(ready);
    let mut policy = ReconnectPolicy::new(&shared.config);
    let mut has_connected = false;

    loop {
        shared.set_state(ConnectionState::Connecting);
        let attempt = tokio::select! {
            () = cancel.cancelled() => break,
            attempt = shared.establish(&endpoint) => attempt,
        };

        match attempt {
            Ok(framed) => {
                let attempts = policy.current_attempt();
                policy.reset();
                shared.set_state(ConnectionState::Connected);
                tracing::info!(venue = %venue, channel = %channel, endpoint = %endpoint, "Session connected");

                let notice = if has_connected {
                    SessionEvent::Reconnected { venue, channel, attempts }
                } else {
                    SessionEvent::Connected { venue, channel }
                };
                has_connected = true;
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                shared.emit(notice, &cancel).await;

                match run_connection(&shared, framed, &cancel).await {
                    ConnectionOutcome::Cancelled => break,
                    ConnectionOutcome::Faulted(reason) => {
                        shared.set_state(ConnectionState::Connecting);
                        tracing::warn!(venue = %venue, channel = %channel, reason = %reason, "Session faulted");
                        shared.emit(SessionEvent::Disconnected { venue, channel, reason }, &cancel).await;
                    }
                }
            }
            Err(err) => {
                let error = GatewayError::from(err).with_context("venue", venue.as_str());
                tracing::warn!(venue = %venue, channel = %channel, error = %error, "Connect attempt failed");
                shared.set_state(ConnectionState::Error);
                shared
                    .emit(
                        SessionEvent::ConnectFailed { venue, channel, error: error.clone() },
                        &cancel,
                    )
                    .await;
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(error));
                    return;
                }
            }
        }

        match policy.next_backoff() {
            Some(delay) => {
                metrics::record_reconnect_attempt(venue.as_str(), channel.as_str());
                tracing::info!(
                    venue = %venue,
                    channel = %channel,
                    attempt = policy.current_attempt(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconnecting"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                let attempts = policy.current_attempt();
                shared.set_state(ConnectionState::Error);
                tracing::error!(venue = %venue, channel = %channel, attempts, "Reconnect attempts exhausted");
                shared.emit(SessionEvent::GaveUp { venue, channel, attempts }, &cancel).await;
                return;
            }
        }
    }

    *shared.outbound.write() = None;
}

async fn run_connection(
    shared: &Arc<Shared>,
    framed: Framed<BoxedStream, FrameCodec>,
    cancel: &CancellationToken,
) -> ConnectionOutcome {
    let (mut sink, mut stream) = framed.split();

    // Open the outbound queue first so subscriptions added during replay are not lost.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(shared.config.outbound_buffer.max(1));
    *shared.outbound.write() = Some(out_tx);

    if let Err(e) = replay_session(shared, &mut sink).await {
        *shared.outbound.write() = None;
        return ConnectionOutcome::Faulted(format!("post-connect send failed: {e}"));
    }

    shared.heartbeat.reset();
    let heartbeat_cancel = cancel.child_token();
    let (hb_tx, mut hb_rx) = mpsc::channel(4);
    tokio::spawn(
        HeartbeatManager::new(
            HeartbeatConfig::from_session(&shared.config),
            Arc::clone(&shared.heartbeat),
            hb_tx,
            heartbeat_cancel.clone(),
        )
        .run(),
    );

    let mut refresh = shared.config.session_refresh_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });
    let mut assembler = MessageAssembler::new(shared.config.max_frame_size);
    let venue = shared.venue.as_str();
    let channel = shared.channel.as_str();

    let outcome = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let close = Frame::close(Some(1000), "client disconnect");
                let _ = tokio::time::timeout(Duration::from_secs(1), shared.send_frame(&mut sink, close)).await;
                break ConnectionOutcome::Cancelled;
            }
            inbound = stream.next() => {
                let frame = match inbound {
                    None => break ConnectionOutcome::Faulted("connection closed by peer".into()),
                    Some(Err(e)) => break ConnectionOutcome::Faulted(format!("read failed: {e}")),
                    Some(Ok(frame)) => frame,
                };
                shared.heartbeat.record_inbound();
                metrics::record_frame(venue, channel, "in", frame.payload.len());

                let result = match assembler.push(frame) {
                    Ok(Some(Message::Text(text))) => shared.handle_text(&text, &mut sink, cancel).await,
                    Ok(Some(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => shared.handle_text(text, &mut sink, cancel).await,
                        Err(_) => {
                            tracing::debug!(venue, len = bytes.len(), "Ignoring non-UTF-8 binary message");
                            Ok(())
                        }
                    },
                    Ok(Some(Message::Ping(payload))) => shared.send_frame(&mut sink, Frame::pong(payload)).await,
                    Ok(Some(Message::Pong(_)) | None) => Ok(()),
                    Ok(Some(Message::Close(details))) => {
                        let (code, reason) = details.unwrap_or((1005, String::new()));
                        let echo = Frame::close(Some(if code == 1005 { 1000 } else { code }), "");
                        let _ = shared.send_frame(&mut sink, echo).await;
                        break ConnectionOutcome::Faulted(format!("closed by venue: {code} {reason}"));
                    }
                    Err(e) => break ConnectionOutcome::Faulted(format!("protocol error: {e}")),
                };
                if let Err(e) = result {
                    break ConnectionOutcome::Faulted(format!("write failed: {e}"));
                }
            }
            Some(text) = out_rx.recv() => {
                if let Err(e) = shared.send_frame(&mut sink, Frame::text(text)).await {
                    break ConnectionOutcome::Faulted(format!("write failed: {e}"));
                }
            }
            Some(event) = hb_rx.recv() => match event {
                HeartbeatEvent::SendPing => {
                    shared.heartbeat.mark_ping_sent();
                    let frame = shared
                        .adapter
                        .heartbeat(shared.next_id())
                        .map_or_else(|| Frame::ping(bytes::Bytes::new()), Frame::text);
                    if let Err(e) = shared.send_frame(&mut sink, frame).await {
                        break ConnectionOutcome::Faulted(format!("write failed: {e}"));
                    }
                }
                HeartbeatEvent::Timeout => {
                    break ConnectionOutcome::Faulted("keepalive timeout".into());
                }
            },
            () = next_tick(&mut refresh) => {
                let frame = shared
                    .adapter
                    .session_refresh_frame(&shared.credentials.read(), shared.next_id());
                if let Some(text) = frame {
                    if let Err(e) = shared.send_frame(&mut sink, Frame::text(text)).await {
                        break ConnectionOutcome::Faulted(format!("write failed: {e}"));
                    }
                }
                shared.spawn_refresh(cancel);
            }
        }
    };

    heartbeat_cancel.cancel();
    *shared.outbound.write() = None;
    outcome
}

/// Login and subscription replay for a fresh connection.
async fn replay_session(shared: &Shared, sink: &mut FrameSink) -> Result<(), FrameError> {
    let login = shared
        .adapter
        .login_frame(&shared.credentials.read(), shared.channel, shared.next_id());
    if let Some(login) = login {
        shared.send_frame(sink, Frame::text(login)).await?;
    }

    let channels: Vec<String> = shared.subscriptions.read().iter().cloned().collect();
    if channels.is_empty() {
        return Ok(());
    }
    let requests = shared.adapter.build_subscription_request(
        &channels,
        SubscriptionAction::Subscribe,
        shared.next_id(),
    );
    tracing::info!(venue = %shared.venue, count = channels.len(), "Replaying subscriptions");
    for request in requests {
        shared.send_frame(sink, Frame::text(request)).await?;
    }
    Ok(())
}

async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::venues::{BinanceAdapter, DeribitAdapter};
    use crate::infrastructure::websocket::FakeTransport;

    const WAIT: Duration = Duration::from_secs(2);

    fn quick_config() -> SessionConfig {
        SessionConfig {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(10),
            max_reconnect_delay: Duration::from_millis(20),
            backoff_multiplier: 1.0,
            reconnect_jitter: false,
            ..SessionConfig::default()
        }
    }

    fn session(
        adapter: VenueAdapter,
        channel: ChannelKind,
        transport: &FakeTransport,
    ) -> (ConnectionSessionManager, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let session = ConnectionSessionManager::builder(Arc::new(adapter), channel)
            .config(quick_config())
            .transport(Arc::new(transport.clone()))
            .build(tx)
            .unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn private_connect_without_credentials_fails_fast() {
        let transport = FakeTransport::new();
        let (session, _rx) = session(
            VenueAdapter::Binance(BinanceAdapter::default()),
            ChannelKind::Private,
            &transport,
        );
        let err = session.connect("ws://fake/ws").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AuthenticationError);
        assert_eq!(transport.attempts(), 0);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_first_connect_sets_error() {
        let transport = FakeTransport::new();
        transport.refuse_all(true);
        let (session, mut rx) = session(
            VenueAdapter::Binance(BinanceAdapter::default()),
            ChannelKind::Public,
            &transport,
        );
        assert!(session.connect("ws://fake/ws").await.is_err());
        assert_eq!(session.state(), ConnectionState::Error);
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::ConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn answers_pings_and_replays_subscriptions() {
        let transport = FakeTransport::new();
        let (session, mut rx) = session(
            VenueAdapter::Binance(BinanceAdapter::default()),
            ChannelKind::Public,
            &transport,
        );
        session.subscribe("btcusdt@aggTrade").await.unwrap();

        let accept = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.accept(WAIT).await })
        };
        session.connect("ws://fake/ws").await.unwrap();
        let mut peer = accept.await.unwrap().unwrap();
        assert!(matches!(rx.recv().await, Some(SessionEvent::Connected { .. })));

        let replay = peer.next_text(WAIT).await.unwrap();
        assert!(replay.contains("SUBSCRIBE"));
        assert!(replay.contains("btcusdt@aggTrade"));

        peer.send_ping(b"hb").await.unwrap();
        let pong = peer
            .next_of(super::super::frame::OpCode::Pong, WAIT)
            .await
            .unwrap();
        assert_eq!(&pong.payload[..], b"hb");

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn deribit_heartbeat_requests_are_answered() {
        let transport = FakeTransport::new();
        let (session, _rx) = session(
            VenueAdapter::Deribit(DeribitAdapter::default()),
            ChannelKind::Public,
            &transport,
        );
        let accept = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.accept(WAIT).await })
        };
        session.connect("ws://fake/ws/api/v2").await.unwrap();
        let mut peer = accept.await.unwrap().unwrap();

        peer.send_text(
            r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"test_request"}}"#,
        )
        .await
        .unwrap();
        let reply = peer.next_text(WAIT).await.unwrap();
        assert!(reply.contains("public/test"));
        session.disconnect().await;
    }

    /// Refresher that blocks long enough to still be running at disconnect.
    #[derive(Default)]
    struct SlowRefresher {
        started: AtomicU32,
        finished: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SessionRefresher for SlowRefresher {
        async fn refresh(&self) -> GatewayResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn disconnect_stops_in_flight_refresh() {
        let transport = FakeTransport::new();
        let refresher = Arc::new(SlowRefresher::default());
        let (tx, _rx) = mpsc::channel(64);
        let session = ConnectionSessionManager::builder(
            Arc::new(VenueAdapter::Binance(BinanceAdapter::default())),
            ChannelKind::Public,
        )
        .config(SessionConfig {
            session_refresh_interval: Some(Duration::from_millis(20)),
            ..quick_config()
        })
        .transport(Arc::new(transport.clone()))
        .refresher(Arc::clone(&refresher) as Arc<dyn SessionRefresher>)
        .build(tx)
        .unwrap();

        let accept = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.accept(WAIT).await })
        };
        session.connect("ws://fake/ws").await.unwrap();
        let _peer = accept.await.unwrap().unwrap();

        let deadline = tokio::time::Instant::now() + WAIT;
        while refresher.started.load(Ordering::SeqCst) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "refresh never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        session.disconnect().await;
        let started = refresher.started.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(refresher.started.load(Ordering::SeqCst), started);
        assert_eq!(refresher.finished.load(Ordering::SeqCst), 0);
        assert_eq!(session.shared.refresh_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_without_connection_is_rejected() {
        let transport = FakeTransport::new();
        let (session, _rx) = session(
            VenueAdapter::Binance(BinanceAdapter::default()),
            ChannelKind::Public,
            &transport,
        );
        let err = session.send_text("{}".into()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn empty_subscription_is_rejected() {
        let transport = FakeTransport::new();
        let (session, _rx) = session(
            VenueAdapter::Binance(BinanceAdapter::default()),
            ChannelKind::Public,
            &transport,
        );
        assert!(session.subscribe("  ").await.is_err());
        session.subscribe("a").await.unwrap();
        session.subscribe("a").await.unwrap();
        session.subscribe("b").await.unwrap();
        session.unsubscribe("a").await.unwrap();
        assert_eq!(session.subscriptions(), vec!["b".to_string()]);
    }
}
