// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Exchange Gateway - Rust Core Library
//!
//! Connectivity and order lifecycle core for crypto venues (Binance,
//! Deribit, GRVT).
//!
//! # Architecture (Clean Architecture + Hexagonal)
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: canonical records, order state machine, identifiers
//!   - `canonical`: venue-neutral trades, books, orders, positions, balances
//!   - `order_execution`: order aggregate, states, transitions
//!   - `shared`: venues, ids, credentials, timestamps
//!
//! - **Application**: orchestration and port definitions
//!   - `ports`: order gateway, reconciliation, session refresh, event publishing
//!   - `services`: `OrderLifecycleCoordinator`
//!
//! - **Infrastructure**: adapters
//!   - `websocket`: RFC 6455 client, keepalive, reconnecting sessions
//!   - `venues`: per-venue protocol adapters and the order gateway
//!   - `http`: signed REST client for snapshots and session renewal
//!   - `messaging`: serialized event bus publisher
//!
//! Cross-cutting: `resilience`, `observability`, `config`, `error`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Clean Architecture Layers
// =============================================================================

/// Domain layer - Core business logic with no external dependencies.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Cross-cutting
// =============================================================================

/// YAML configuration with environment interpolation.
pub mod config;

/// Gateway error taxonomy.
pub mod error;

/// Logging, tracing and Prometheus metrics.
pub mod observability;

/// Circuit breakers, retry, rate limiting and dead letters.
pub mod resilience;

// =============================================================================
// Re-exports
// =============================================================================

pub use application::ports::{ChannelKind, EventPublisherPort, NoOpEventPublisher, SessionEvent};
pub use application::services::{OrderLifecycleCoordinator, ReconciliationReport, VenueLink};
pub use config::{GatewayConfig, load_config};
pub use domain::canonical::CanonicalEvent;
pub use domain::order_execution::{OrderState, OrderStateMachine};
pub use domain::shared::{ClOrdId, SessionCredentials, Venue};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use infrastructure::venues::{ExchangeProtocolAdapter, VenueAdapter, VenueOrderGateway};
pub use infrastructure::websocket::ConnectionSessionManager;
pub use resilience::{ResilienceConfig, ResilienceManager};
