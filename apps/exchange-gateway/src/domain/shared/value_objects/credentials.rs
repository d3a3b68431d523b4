//! Venue credentials.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Credentials for one venue account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionCredentials {
    /// Public data only.
    #[default]
    None,
    /// HMAC-signed venues (Binance) and client-credential logins (Deribit).
    ApiKey {
        /// API key.
        api_key: String,
        /// API secret.
        api_secret: String,
    },
    /// Cookie-authenticated venues (GRVT).
    Cookie {
        /// Current session cookie value.
        #[serde(default)]
        session_cookie: String,
        /// Trading account id.
        account_id: String,
        /// API key used to obtain a fresh cookie.
        #[serde(default)]
        api_key: Option<String>,
    },
}

impl SessionCredentials {
    /// Key/secret pair.
    #[must_use]
    pub fn api_key(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self::ApiKey {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Cookie/account pair.
    #[must_use]
    pub fn cookie(session_cookie: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self::Cookie {
            session_cookie: session_cookie.into(),
            account_id: account_id.into(),
            api_key: None,
        }
    }

    /// Returns true if every field a private channel needs is present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        match self {
            Self::None => false,
            Self::ApiKey {
                api_key,
                api_secret,
            } => !api_key.trim().is_empty() && !api_secret.trim().is_empty(),
            Self::Cookie {
                session_cookie,
                account_id,
                ..
            } => !session_cookie.trim().is_empty() && !account_id.trim().is_empty(),
        }
    }

    /// Replace the session cookie, keeping the rest.
    pub fn set_session_cookie(&mut self, cookie: impl Into<String>) {
        if let Self::Cookie { session_cookie, .. } = self {
            *session_cookie = cookie.into();
        }
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "SessionCredentials::None"),
            Self::ApiKey { api_key, .. } => f
                .debug_struct("SessionCredentials::ApiKey")
                .field("api_key", &redact(api_key))
                .field("api_secret", &"***")
                .finish(),
            Self::Cookie { account_id, .. } => f
                .debug_struct("SessionCredentials::Cookie")
                .field("account_id", account_id)
                .field("session_cookie", &"***")
                .finish(),
        }
    }
}

fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}***")
}

/// Credentials shared between a session and the REST client that renews them.
pub type SharedCredentials = Arc<RwLock<SessionCredentials>>;

/// Wrap credentials for sharing.
#[must_use]
pub fn shared_credentials(credentials: SessionCredentials) -> SharedCredentials {
    Arc::new(RwLock::new(credentials))
}
