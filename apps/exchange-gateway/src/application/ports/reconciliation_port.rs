//! Reconciliation Port (Driven Port)
//!
//! HTTP collaborator used to resynchronize state after a gap. Queries are
//! built by the venue adapter and executed (signed when required) by the
//! implementation; the JSON body is handed back for the adapter to parse.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::canonical::CanonicalEvent;
use crate::error::GatewayResult;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
}

impl HttpMethod {
    /// Uppercase method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A venue REST call, before signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestQuery {
    /// Method.
    pub method: HttpMethod,
    /// Path relative to the venue REST base URL, or an absolute URL.
    pub path: String,
    /// Query parameters in venue order.
    pub params: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Whether the call needs credentials.
    pub signed: bool,
}

impl RestQuery {
    /// Unsigned GET.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            params: Vec::new(),
            body: None,
            signed: false,
        }
    }

    /// Unsigned POST with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            params: Vec::new(),
            body: Some(body),
            signed: false,
        }
    }

    /// Override the method.
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Mark as requiring credentials.
    #[must_use]
    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }
}

/// What a reconciliation query fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Orders still working at the venue.
    OpenOrders,
    /// Non-flat positions.
    Positions,
    /// Account balances.
    Balances,
}

impl SnapshotKind {
    /// Every kind, in the order reconciliation runs them.
    pub const ALL: [Self; 3] = [Self::OpenOrders, Self::Positions, Self::Balances];

    /// Operation label for logs and dead letters.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenOrders => "open_orders",
            Self::Positions => "positions",
            Self::Balances => "balances",
        }
    }
}

/// Port executing venue REST queries.
#[async_trait]
pub trait ReconciliationPort: Send + Sync {
    /// Execute `query`, returning the decoded JSON body.
    async fn request(&self, query: &RestQuery) -> GatewayResult<Value>;
}

/// Venue-specific shape of reconciliation snapshots.
pub trait SnapshotProtocol: Send + Sync {
    /// Query fetching `kind`.
    fn snapshot_query(&self, kind: SnapshotKind) -> RestQuery;

    /// Decode a snapshot body into canonical records.
    ///
    /// # Errors
    ///
    /// Returns an API error when the body does not have the venue's shape.
    fn decode_snapshot(&self, kind: SnapshotKind, body: &Value) -> GatewayResult<Vec<CanonicalEvent>>;
}
