//! HTTP side of an inspector connection: target discovery requests and
//! the WebSocket upgrade handshake.

use super::connection::Connection;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Magic string from the WebSocket specification.
const WS_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADERS: usize = 64;
/// Largest request head (or declared body) kept while waiting for the rest.
pub const MAX_HEADER_SIZE: usize = 80 * 1024;

pub const HANDSHAKE_FAILED_RESPONSE: &str = "HTTP/1.0 400 Bad Request\r\n\
     Content-Type: text/html; charset=UTF-8\r\n\r\n\
     WebSockets request was expected\r\n";

/// One fully received request, reduced to what the server acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEvent {
    pub path: String,
    pub upgrade: bool,
    pub is_get: bool,
    pub ws_key: String,
    pub host: String,
}

/// What the server is asked to do after a batch of bytes was parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpRequest {
    Get { host: String, path: String },
    Upgrade { host: String, path: String, ws_key: String },
}

/// `base64(SHA1(key + magic))`
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_MAGIC.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

pub fn switching_protocols_response(client_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
    .into_bytes()
}

pub fn json_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.0 200 OK\r\n\
         Content-Type: application/json; charset=UTF-8\r\n\
         Cache-Control: no-cache\r\n\
         Content-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

/// Strip a trailing `:port`, leaving bracketed IPv6 literals intact.
pub fn trim_port(host: &str) -> &str {
    let Some(colon) = host.rfind(':') else {
        return host;
    };
    match host.rfind(']') {
        Some(bracket) if colon < bracket => host,
        _ => &host[..colon],
    }
}

pub fn is_ip_address(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        return inner.parse::<Ipv6Addr>().is_ok();
    }
    host.parse::<Ipv4Addr>().is_ok()
}

/// DNS-rebinding guard: only requests addressed to an IP literal or to
/// localhost may drive the debugger.
pub fn is_allowed_host(host_with_port: &str) -> bool {
    let host = trim_port(host_with_port);
    host.is_empty()
        || is_ip_address(host)
        || host.eq_ignore_ascii_case("localhost")
        || host.eq_ignore_ascii_case("localhost6")
}

/// Value of a header, or empty when it is missing or repeated.
fn header_value(headers: &[httparse::Header<'_>], name: &str) -> String {
    let mut found = headers.iter().filter(|h| h.name.eq_ignore_ascii_case(name));
    match (found.next(), found.next()) {
        (Some(header), None) => String::from_utf8_lossy(header.value).trim().to_string(),
        _ => String::new(),
    }
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Parse as many complete requests as `buffer` holds, draining them.
///
/// Stops after an upgrade request: whatever follows belongs to the next
/// protocol and stays in the buffer.
pub fn parse_requests(buffer: &mut Vec<u8>) -> Result<Vec<HttpEvent>> {
    let mut events = Vec::new();
    loop {
        if buffer.is_empty() {
            break;
        }
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        let header_len = match request.parse(&buffer[..]) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) if buffer.len() > MAX_HEADER_SIZE => {
                return Err(Error::Http(format!(
                    "Header overflow: {} bytes without end of headers",
                    buffer.len()
                )));
            }
            Ok(httparse::Status::Partial) => break,
            Err(e) => return Err(Error::Http(e.to_string())),
        };

        let headers: &[httparse::Header<'_>] = request.headers;
        let content_length = match header_value(headers, "Content-Length") {
            value if value.is_empty() => 0,
            value => value
                .parse::<usize>()
                .map_err(|_| Error::Http(format!("Invalid Content-Length: {}", value)))?,
        };
        if content_length > MAX_HEADER_SIZE {
            return Err(Error::Http(format!("Body too large: {}", content_length)));
        }
        if buffer.len() < header_len + content_length {
            break;
        }

        let upgrade = !header_value(headers, "Upgrade").is_empty()
            && has_token(&header_value(headers, "Connection"), "upgrade");
        let event = HttpEvent {
            path: request.path.unwrap_or_default().to_string(),
            upgrade,
            is_get: request.method == Some("GET"),
            ws_key: header_value(headers, "Sec-WebSocket-Key"),
            host: header_value(headers, "Host"),
        };

        buffer.drain(..header_len + content_length);
        events.push(event);
        if upgrade {
            break;
        }
    }
    Ok(events)
}

/// Protocol handler for a connection that has not upgraded yet.
pub struct HttpHandler {
    connection: Connection,
    buffer: Vec<u8>,
    closed: bool,
}

impl HttpHandler {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            buffer: Vec::new(),
            closed: false,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes received after the upgrade request, handed to the next handler.
    pub fn take_remaining(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Feed received bytes and classify every completed request.
    ///
    /// A request that fails the host policy, is not a GET, or asks for an
    /// upgrade without a key cancels the handshake; nothing after it is
    /// reported.
    pub fn on_data(&mut self, data: &[u8]) -> Vec<HttpRequest> {
        let mut requests = Vec::new();
        if self.closed {
            return requests;
        }
        self.buffer.extend_from_slice(data);

        let events = match parse_requests(&mut self.buffer) {
            Ok(events) => events,
            Err(e) => {
                warn!("Bad HTTP request from {:?}: {}", self.connection.peer(), e);
                self.cancel_handshake();
                return requests;
            }
        };

        for event in events {
            if !is_allowed_host(&event.host) {
                warn!(
                    path = %event.path,
                    "Rejecting request from {:?}: {}",
                    self.connection.peer(),
                    Error::HostNotAllowed(event.host)
                );
                self.cancel_handshake();
                return requests;
            }
            if !event.is_get {
                warn!("Rejecting non-GET request to {}", event.path);
                self.cancel_handshake();
                return requests;
            }
            if !event.upgrade {
                debug!("HTTP GET {} (host: '{}')", event.path, event.host);
                requests.push(HttpRequest::Get {
                    host: event.host,
                    path: event.path,
                });
            } else if event.ws_key.is_empty() {
                warn!("Upgrade request to {} without Sec-WebSocket-Key", event.path);
                self.cancel_handshake();
                return requests;
            } else {
                debug!("WebSocket upgrade requested for {}", event.path);
                requests.push(HttpRequest::Upgrade {
                    host: event.host,
                    path: event.path,
                    ws_key: event.ws_key,
                });
            }
        }
        requests
    }

    pub fn on_eof(&mut self) {
        self.close();
    }

    pub fn write(&mut self, data: &[u8]) {
        if self.connection.write_raw(data.to_vec()).is_err() {
            self.closed = true;
        }
    }

    /// Answer 400 and close once the response has been written.
    pub fn cancel_handshake(&mut self) {
        if self.closed {
            return;
        }
        let _ = self
            .connection
            .write_raw(HANDSHAKE_FAILED_RESPONSE.as_bytes().to_vec());
        self.close();
    }

    /// Send the 101 response. The caller swaps in the WebSocket handler.
    pub fn accept_upgrade(&mut self, ws_key: &str) -> Result<()> {
        let result = self.connection.write_raw(switching_protocols_response(ws_key));
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.buffer.clear();
        self.connection.close();
    }
}
