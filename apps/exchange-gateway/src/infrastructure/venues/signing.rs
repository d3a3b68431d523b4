//! Request signing.
//!
//! Binance signs the query string it receives, so the signed string and the
//! sent string must be byte-identical: parameters keep their given order and
//! `timestamp` goes last. Deribit signs a newline-joined request digest.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `message` under `secret`.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // HMAC accepts keys of any length, so this never fails.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
#[must_use]
pub fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// `k=v&k=v` in the given order.
#[must_use]
pub fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Query string with `timestamp` appended and signed.
#[must_use]
pub fn sign_query(secret: &str, params: &[(String, String)], timestamp_ms: i64) -> String {
    let mut query = encode_query(params);
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&format!("timestamp={timestamp_ms}"));
    let signature = hmac_sha256_hex(secret, &query);
    format!("{query}&signature={signature}")
}

/// Deribit `Authorization` header value.
#[must_use]
pub fn deribit_authorization(
    client_id: &str,
    secret: &str,
    timestamp_ms: i64,
    nonce: &str,
    method: &str,
    uri: &str,
    body: &str,
) -> String {
    let digest = format!("{timestamp_ms}\n{nonce}\n{method}\n{uri}\n{body}\n");
    let signature = hmac_sha256_hex(secret, &digest);
    format!("deri-hmac-sha256 id={client_id},ts={timestamp_ms},sig={signature},nonce={nonce}")
}
