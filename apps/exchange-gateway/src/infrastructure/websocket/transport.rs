//! Byte-stream transports under a session.
//!
//! [`NetworkTransport`] dials TCP and wraps it in TLS for `wss`.
//! [`FakeTransport`] hands out in-memory duplex pipes whose far ends are
//! driven by a [`FakePeer`], so the whole session state machine runs in
//! tests without a socket.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{self, RootCertStore, pki_types::ServerName};
use tokio_util::codec::Framed;

use super::frame::{Frame, FrameCodec, FrameError, OpCode};
use super::handshake::{UpgradeRequest, server_handshake};
use super::types::{Endpoint, SessionError};

/// Any bidirectional byte stream.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// Boxed stream handed to the handshake and frame codec.
pub type BoxedStream = Box<dyn IoStream>;

/// Opens byte streams to endpoints.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open a stream to `endpoint`, TLS included when it is `wss`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream, SessionError>;
}

/// TCP plus rustls with the webpki root set.
#[derive(Clone)]
pub struct NetworkTransport {
    connector: TlsConnector,
}

impl NetworkTransport {
    /// Build a transport with the ring crypto provider.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Tls`] if no safe protocol version is available.
    pub fn new() -> Result<Self, SessionError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| SessionError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }
}

impl fmt::Debug for NetworkTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream, SessionError> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        tcp.set_nodelay(true)?;

        if !endpoint.secure {
            return Ok(Box::new(tcp));
        }

        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| SessionError::Tls(format!("invalid server name: {e}")))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| SessionError::Tls(e.to_string()))?;

        tracing::debug!(host = %endpoint.host, port = endpoint.port, "TLS established");
        Ok(Box::new(tls))
    }
}

/// In-memory transport for tests.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<FakeInner>,
}

struct FakeInner {
    peers_tx: mpsc::UnboundedSender<DuplexStream>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    scripted_failures: Mutex<VecDeque<std::io::ErrorKind>>,
    refuse_all: std::sync::atomic::AtomicBool,
    attempts: AtomicU32,
}

impl FakeTransport {
    /// New transport accepting every connection.
    #[must_use]
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(FakeInner {
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
                scripted_failures: Mutex::new(VecDeque::new()),
                refuse_all: std::sync::atomic::AtomicBool::new(false),
                attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        let mut failures = self.inner.scripted_failures.lock();
        failures.extend(std::iter::repeat_n(
            std::io::ErrorKind::ConnectionRefused,
            count,
        ));
    }

    /// Refuse every attempt until switched off.
    pub fn refuse_all(&self, refuse: bool) {
        self.inner.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Connection attempts seen so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Next raw server-side stream, before any handshake.
    pub async fn accept_raw(&self, wait: Duration) -> Option<DuplexStream> {
        let mut rx = self.inner.peers_rx.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
    }

    /// Next connection with the upgrade completed.
    pub async fn accept(&self, wait: Duration) -> Option<FakePeer> {
        let mut stream = self.accept_raw(wait).await?;
        let request = server_handshake(&mut stream).await.ok()?;
        Some(FakePeer {
            framed: Framed::new(stream, FrameCodec::server()),
            request,
        })
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeTransport")
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream, SessionError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        if self.inner.refuse_all.load(Ordering::SeqCst) {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("refused: {endpoint}"),
            )));
        }
        if let Some(kind) = self.inner.scripted_failures.lock().pop_front() {
            return Err(SessionError::Io(std::io::Error::new(
                kind,
                format!("scripted failure: {endpoint}"),
            )));
        }

        let (client, server) = tokio::io::duplex(256 * 1024);
        self.inner
            .peers_tx
            .send(server)
            .map_err(|_| SessionError::NotConnected)?;
        Ok(Box::new(client))
    }
}

/// Server end of a fake connection.
pub struct FakePeer {
    framed: Framed<DuplexStream, FrameCodec>,
    request: UpgradeRequest,
}

impl FakePeer {
    /// The upgrade request the client sent.
    #[must_use]
    pub const fn request(&self) -> &UpgradeRequest {
        &self.request
    }

    /// Send a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client end is gone.
    pub async fn send(&mut self, frame: Frame) -> Result<(), FrameError> {
        self.framed.send(frame).await
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Returns an error if the client end is gone.
    pub async fn send_text(&mut self, text: &str) -> Result<(), FrameError> {
        self.send(Frame::text(text)).await
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the client end is gone.
    pub async fn send_ping(&mut self, payload: &'static [u8]) -> Result<(), FrameError> {
        self.send(Frame::ping(Bytes::from_static(payload))).await
    }

    /// Send a close frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the client end is gone.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<(), FrameError> {
        self.send(Frame::close(Some(code), reason)).await
    }

    /// Next frame from the client, `None` on EOF or after `wait`.
    pub async fn next_frame(&mut self, wait: Duration) -> Option<Frame> {
        match tokio::time::timeout(wait, self.framed.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    /// Next text message from the client, skipping control frames.
    pub async fn next_text(&mut self, wait: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self.next_frame(remaining).await?;
            if frame.opcode == OpCode::Text {
                return String::from_utf8(frame.payload.to_vec()).ok();
            }
        }
    }

    /// Next frame with the given opcode, skipping others.
    pub async fn next_of(&mut self, opcode: OpCode, wait: Duration) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self.next_frame(remaining).await?;
            if frame.opcode == opcode {
                return Some(frame);
            }
        }
    }
}

impl fmt::Debug for FakePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakePeer")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
