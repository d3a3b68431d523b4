//! Venue REST client.
//!
//! Executes [`RestQuery`]s built by a venue adapter, signing them with the
//! adapter's `build_auth`. Serves reconciliation snapshots, order entry for
//! REST-only venues, listen-key creation and session renewal.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Method};
use serde_json::Value;

use crate::application::ports::{HttpMethod, ReconciliationPort, RestQuery, SessionRefresher};
use crate::domain::shared::{SessionCredentials, SharedCredentials, Venue, now_millis};
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::infrastructure::venues::{AuthRequest, ExchangeProtocolAdapter, VenueAdapter};
use crate::resilience::classify_status;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const GRVT_COOKIE: &str = "gravity";
const GRVT_ACCOUNT_HEADER: &str = "x-grvt-account-id";

/// HTTP client bound to one venue.
pub struct VenueRestClient {
    client: Client,
    base_url: String,
    adapter: Arc<VenueAdapter>,
    credentials: SharedCredentials,
    listen_key: RwLock<Option<String>>,
}

impl VenueRestClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns a system error if the HTTP client cannot be built.
    pub fn new(
        adapter: Arc<VenueAdapter>,
        base_url: impl Into<String>,
        credentials: SharedCredentials,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::system(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            adapter,
            credentials,
            listen_key: RwLock::new(None),
        })
    }

    /// Venue served.
    #[must_use]
    pub fn venue(&self) -> Venue {
        self.adapter.venue()
    }

    /// Listen key from the last [`Self::create_listen_key`].
    #[must_use]
    pub fn listen_key(&self) -> Option<String> {
        self.listen_key.read().clone()
    }

    /// Open a private user stream, for venues that use one.
    ///
    /// Returns `Ok(None)` when the venue authenticates its private channel
    /// some other way.
    ///
    /// # Errors
    ///
    /// Transport and API errors, or an API error when the response carries
    /// no key.
    pub async fn create_listen_key(&self) -> GatewayResult<Option<String>> {
        let Some(query) = self.adapter.user_stream_query() else {
            return Ok(None);
        };
        let (_, body) = self.send(&query).await?;
        let key = body
            .get("listenKey")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| GatewayError::api("listen key missing from response"))?
            .to_string();

        tracing::info!(venue = %self.venue(), "Listen key created");
        *self.listen_key.write() = Some(key.clone());
        Ok(Some(key))
    }

    fn url_for(&self, path: &str, query: &str) -> String {
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.base_url)
        };
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(query);
        }
        url
    }

    /// Sign and send `query`, returning response headers and JSON body.
    async fn send(&self, query: &RestQuery) -> GatewayResult<(HeaderMap, Value)> {
        let body = query
            .body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| GatewayError::validation(format!("request body: {e}")))?;
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let signed = {
            let credentials = self.credentials.read();
            self.adapter.build_auth(
                &credentials,
                &AuthRequest {
                    query,
                    body: body.as_deref(),
                    timestamp_ms: now_millis(),
                    nonce: &nonce,
                },
            )?
        };

        let url = self.url_for(&query.path, &signed.query);
        let mut request = self.client.request(method(query.method), &url);
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = signed.body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        tracing::debug!(
            venue = %self.venue(),
            method = %query.method,
            path = %query.path,
            signed = query.signed,
            "REST request"
        );

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        if !status.is_success() {
            let message = error_message(&text).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            return Err(status_error(status.as_u16(), message)
                .with_context("venue", self.venue().as_str())
                .with_context("path", &query.path));
        }

        if text.trim().is_empty() {
            return Ok((headers, Value::Null));
        }
        let body = serde_json::from_str(&text)
            .map_err(|e| GatewayError::api(format!("invalid JSON response: {e}")))?;
        Ok((headers, body))
    }

    /// Store a re-issued session cookie and account id.
    fn absorb_session(&self, headers: &HeaderMap) -> bool {
        let cookie = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| cookie_value(v, GRVT_COOKIE));
        let Some(cookie) = cookie else {
            return false;
        };
        let account = headers
            .get(GRVT_ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut credentials = self.credentials.write();
        credentials.set_session_cookie(cookie);
        if let (SessionCredentials::Cookie { account_id, .. }, Some(account)) =
            (&mut *credentials, account)
        {
            *account_id = account;
        }
        true
    }
}

impl fmt::Debug for VenueRestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VenueRestClient")
            .field("venue", &self.venue())
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReconciliationPort for VenueRestClient {
    async fn request(&self, query: &RestQuery) -> GatewayResult<Value> {
        self.send(query).await.map(|(_, body)| body)
    }
}

#[async_trait]
impl SessionRefresher for VenueRestClient {
    async fn refresh(&self) -> GatewayResult<()> {
        let query = {
            let credentials = self.credentials.read();
            self.adapter.session_refresh_query(&credentials)
        };
        let Some(query) = query else {
            return Ok(());
        };

        let (headers, _) = self.send(&query).await?;
        match self.venue() {
            Venue::Grvt => {
                if !self.absorb_session(&headers) {
                    return Err(GatewayError::authentication(
                        "login response carried no session cookie",
                    ));
                }
                tracing::info!(venue = %self.venue(), "Session cookie renewed");
            }
            Venue::Binance | Venue::Deribit => {
                tracing::debug!(venue = %self.venue(), "Session keepalive sent");
            }
        }
        Ok(())
    }
}

const fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn status_error(status: u16, message: String) -> GatewayError {
    let message = format!("HTTP {status}: {message}");
    let err = match classify_status(status) {
        ErrorKind::RateLimitError => GatewayError::rate_limited(message),
        ErrorKind::AuthenticationError => GatewayError::authentication(message),
        ErrorKind::NetworkError => GatewayError::network(message),
        _ => GatewayError::api(message),
    };
    err.with_context("status", status.to_string())
}

/// Venue error text: `msg` (Binance), `error.message` (Deribit) or
/// `message` (GRVT).
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let text = value
        .get("msg")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(Value::as_str)?;
    Some(text.to_string())
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}
