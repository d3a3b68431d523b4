//! Application Ports (Driven)
//!
//! Interfaces the core uses to reach external systems: the message bus,
//! venue order entry, venue REST queries and session renewal. Also the
//! session notification types the core consumes.

mod event_publisher_port;
mod order_gateway_port;
mod reconciliation_port;
mod session_events;
mod session_refresher_port;

pub use event_publisher_port::{EventPublishError, EventPublisherPort, NoOpEventPublisher};
pub use order_gateway_port::OrderGatewayPort;
pub use reconciliation_port::{
    HttpMethod, ReconciliationPort, RestQuery, SnapshotKind, SnapshotProtocol,
};
pub use session_events::{ChannelKind, SessionEvent};
pub use session_refresher_port::SessionRefresher;
