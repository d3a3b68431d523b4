//! HTTP/1.1 upgrade handshake (RFC 6455 section 4).
//!
//! The response head is read a byte at a time so nothing past `\r\n\r\n`
//! is consumed before the stream is handed to the frame codec.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::{Endpoint, SessionError};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Random base64 `Sec-WebSocket-Key`.
#[must_use]
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::rng().random();
    STANDARD.encode(nonce)
}

/// Expected `Sec-WebSocket-Accept` for `key`.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Upgrade request text.
#[must_use]
pub fn build_request(endpoint: &Endpoint, key: &str, headers: &[(String, String)]) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n",
        endpoint.resource,
        endpoint.host_header()
    );
    for (name, value) in headers {
        request.push_str(name);
        request.push_str(": ");
        request.push_str(value);
        request.push_str("\r\n");
    }
    request.push_str("\r\n");
    request
}

/// Read an HTTP head up to and including the blank line.
///
/// # Errors
///
/// Returns an error on EOF before the head ends or when it exceeds 16 KiB.
pub async fn read_http_head<S>(stream: &mut S) -> Result<String, SessionError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    loop {
        let byte = stream.read_u8().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SessionError::Handshake {
                    status: None,
                    reason: "connection closed during handshake".into(),
                }
            } else {
                SessionError::Io(e)
            }
        })?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(SessionError::Handshake {
                status: None,
                reason: "response head too large".into(),
            });
        }
    }
    String::from_utf8(head).map_err(|_| SessionError::Handshake {
        status: None,
        reason: "response head is not utf-8".into(),
    })
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// Check a `101 Switching Protocols` response against `key`.
///
/// # Errors
///
/// Returns [`SessionError::Handshake`] with the status when the upgrade is refused.
pub fn validate_response(head: &str, key: &str) -> Result<(), SessionError> {
    let status_line = head.lines().next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok());

    if status != Some(101) {
        return Err(SessionError::Handshake {
            status,
            reason: format!("unexpected status line: {status_line}"),
        });
    }
    let upgrade = header(head, "upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(SessionError::Handshake {
            status,
            reason: "missing Upgrade: websocket".into(),
        });
    }
    match header(head, "sec-websocket-accept") {
        Some(accept) if accept == accept_key(key) => Ok(()),
        Some(_) => Err(SessionError::Handshake {
            status,
            reason: "Sec-WebSocket-Accept mismatch".into(),
        }),
        None => Err(SessionError::Handshake {
            status,
            reason: "missing Sec-WebSocket-Accept".into(),
        }),
    }
}

/// Perform the client side of the upgrade.
///
/// # Errors
///
/// Returns an error on I/O failure or when the server refuses the upgrade.
pub async fn client_handshake<S>(
    stream: &mut S,
    endpoint: &Endpoint,
    headers: &[(String, String)],
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let key = generate_key();
    let request = build_request(endpoint, &key, headers);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let head = read_http_head(stream).await?;
    validate_response(&head, &key)
}

/// Parsed upgrade request, as seen by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target.
    pub resource: String,
    /// Header pairs, in order.
    pub headers: Vec<(String, String)>,
}

impl UpgradeRequest {
    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Perform the server side of the upgrade, answering `101`.
///
/// # Errors
///
/// Returns an error when the request is not a WebSocket upgrade.
pub async fn server_handshake<S>(stream: &mut S) -> Result<UpgradeRequest, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_http_head(stream).await?;
    let resource = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let headers: Vec<(String, String)> = head
        .lines()
        .skip(1)
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();
    let request = UpgradeRequest { resource, headers };

    let key = request
        .header("sec-websocket-key")
        .ok_or_else(|| SessionError::Handshake {
            status: None,
            reason: "missing Sec-WebSocket-Key".into(),
        })?;
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_16_bytes() {
        let key = generate_key();
        assert_eq!(STANDARD.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn request_carries_extra_headers() {
        let endpoint = Endpoint::parse("wss://trades.grvt.io/ws/full").unwrap();
        let request = build_request(
            &endpoint,
            "abc",
            &[("Cookie".into(), "gravity=xyz".into())],
        );
        assert!(request.starts_with("GET /ws/full HTTP/1.1\r\nHost: trades.grvt.io\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: abc\r\n"));
        assert!(request.contains("Cookie: gravity=xyz\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn validates_responses() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let ok = "HTTP/1.1 101 Switching Protocols\r\nupgrade: WebSocket\r\n\
                  Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        assert!(validate_response(ok, key).is_ok());

        let refused = "HTTP/1.1 401 Unauthorized\r\n\r\n";
        assert!(matches!(
            validate_response(refused, key),
            Err(SessionError::Handshake {
                status: Some(401),
                ..
            })
        ));

        let wrong = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
                     Sec-WebSocket-Accept: nope\r\n\r\n";
        assert!(validate_response(wrong, key).is_err());
    }

    #[tokio::test]
    async fn client_and_server_agree() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let endpoint = Endpoint::parse("ws://localhost/stream?x=1").unwrap();
        let headers = vec![("X-Test".to_string(), "1".to_string())];

        let server_task = tokio::spawn(async move { server_handshake(&mut server).await });
        client_handshake(&mut client, &endpoint, &headers)
            .await
            .unwrap();
        let request = server_task.await.unwrap().unwrap();
        assert_eq!(request.resource, "/stream?x=1");
        assert_eq!(request.header("x-test"), Some("1"));
    }

    #[tokio::test]
    async fn eof_during_handshake_is_reported() {
        let (mut client, server) = tokio::io::duplex(4096);
        drop(server);
        let endpoint = Endpoint::parse("ws://localhost/").unwrap();
        let err = client_handshake(&mut client, &endpoint, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Handshake { .. } | SessionError::Io(_)
        ));
    }
}
