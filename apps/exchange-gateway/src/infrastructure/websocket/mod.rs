//! WebSocket Session Infrastructure
//!
//! One [`ConnectionSessionManager`] per venue channel owns a socket and
//! runs connect, keepalive, reconnect and session refresh on a single
//! background task. Frames are encoded and decoded here (RFC 6455); venue
//! payloads are handed to the [`VenueAdapter`](crate::infrastructure::venues::VenueAdapter)
//! and come out as [`SessionEvent`]s.
//!
//! # Architecture
//!
//! - [`Transport`]: byte streams, over the network or in memory
//! - [`FrameCodec`]: wire frames, masking and size limits
//! - [`ReconnectPolicy`]: capped exponential backoff with optional jitter
//! - [`HeartbeatManager`]: ping cadence and pong timeout

mod frame;
mod handshake;
mod heartbeat;
mod reconnect;
mod session;
mod transport;
mod types;

pub use frame::{Frame, FrameCodec, FrameError, Message, MessageAssembler, OpCode, Role};
pub use handshake::{UpgradeRequest, accept_key, generate_key};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use reconnect::ReconnectPolicy;
pub use session::{ConnectionSessionManager, SessionBuilder};
pub use transport::{BoxedStream, FakePeer, FakeTransport, NetworkTransport, Transport};
pub use types::{
    ChannelKind, ConnectionState, DEFAULT_MAX_FRAME_SIZE, Endpoint, SessionConfig, SessionError,
    SessionEvent,
};
