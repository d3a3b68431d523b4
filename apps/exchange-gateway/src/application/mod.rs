//! Application Layer
//!
//! Orchestrates the domain through ports:
//!
//! - **Ports**: interfaces to venues, the message bus and session renewal
//! - **Services**: the order lifecycle coordinator

pub mod ports;
pub mod services;

pub use ports::*;
pub use services::*;
