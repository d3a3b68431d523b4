//! Infrastructure Layer
//!
//! Adapters implementing the application ports:
//!
//! - `websocket/`: venue sessions over RFC 6455
//! - `venues/`: per-venue wire protocols and order entry
//! - `http/`: signed REST calls for reconciliation and session renewal
//! - `messaging/`: event publishing to the bus

pub mod http;
pub mod messaging;
pub mod venues;
pub mod websocket;
