//! Session Refresher Port (Driven Port)
//!
//! Out-of-band renewal of a session artifact: a listen-key keepalive or a
//! cookie re-login. Called periodically by the session; a failure is logged
//! and counted but never tears the connection down.

use async_trait::async_trait;

use crate::error::GatewayResult;

/// Renews a venue session artifact.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    /// Renew now.
    async fn refresh(&self) -> GatewayResult<()>;
}
