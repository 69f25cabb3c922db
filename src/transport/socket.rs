use super::connection::Connection;
use super::http::{HttpHandler, HttpRequest};
use super::websocket::WsHandler;
use crate::Result;
use tracing::{debug, info};

/// The active protocol on a connection.
///
/// An upgrade replaces the `Http` value with a `WebSocket` value built on
/// the same connection; the old handler is dropped at that point.
pub enum ProtocolHandler {
    Http(HttpHandler),
    WebSocket(WsHandler),
}

/// Something the session layer has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    HttpGet { host: String, path: String },
    Upgrade { host: String, path: String, ws_key: String },
    Message(String),
}

impl ProtocolHandler {
    pub fn connection(&self) -> &Connection {
        match self {
            Self::Http(handler) => handler.connection(),
            Self::WebSocket(handler) => handler.connection(),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Self::Http(handler) => handler.is_closed(),
            Self::WebSocket(handler) => handler.is_closed(),
        }
    }
}

/// One accepted inspector connection and its current protocol handler.
pub struct InspectorSocket {
    handler: ProtocolHandler,
}

impl InspectorSocket {
    /// Every connection starts out speaking HTTP.
    pub fn accept(connection: Connection) -> Self {
        Self {
            handler: ProtocolHandler::Http(HttpHandler::new(connection)),
        }
    }

    pub fn handler(&self) -> &ProtocolHandler {
        &self.handler
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.handler, ProtocolHandler::WebSocket(_))
    }

    pub fn is_closed(&self) -> bool {
        self.handler.is_closed() || !self.handler.connection().is_open()
    }

    pub fn on_data(&mut self, data: &[u8]) -> Vec<SocketEvent> {
        match &mut self.handler {
            ProtocolHandler::Http(handler) => handler
                .on_data(data)
                .into_iter()
                .map(|request| match request {
                    HttpRequest::Get { host, path } => SocketEvent::HttpGet { host, path },
                    HttpRequest::Upgrade { host, path, ws_key } => {
                        SocketEvent::Upgrade { host, path, ws_key }
                    }
                })
                .collect(),
            ProtocolHandler::WebSocket(handler) => handler
                .on_data(data)
                .into_iter()
                .map(SocketEvent::Message)
                .collect(),
        }
    }

    pub fn on_eof(&mut self) {
        match &mut self.handler {
            ProtocolHandler::Http(handler) => handler.on_eof(),
            ProtocolHandler::WebSocket(handler) => handler.on_eof(),
        }
    }

    /// Complete the handshake and switch to WebSocket framing.
    ///
    /// Bytes that arrived behind the upgrade request are decoded by the new
    /// handler right away; the resulting messages are returned.
    pub fn accept_upgrade(&mut self, ws_key: &str) -> Result<Vec<SocketEvent>> {
        let ProtocolHandler::Http(http) = &mut self.handler else {
            panic!("accept_upgrade called on an upgraded socket");
        };
        http.accept_upgrade(ws_key)?;
        let remaining = http.take_remaining();
        let connection = http.connection().clone();

        info!("WebSocket session established with {:?}", connection.peer());
        self.handler = ProtocolHandler::WebSocket(WsHandler::new(connection));

        if remaining.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Replaying {} bytes received with the upgrade", remaining.len());
        Ok(self.on_data(&remaining))
    }

    pub fn cancel_handshake(&mut self) {
        if let ProtocolHandler::Http(handler) = &mut self.handler {
            handler.cancel_handshake();
        }
    }

    /// Raw bytes for HTTP, one text frame for WebSocket.
    pub fn write(&mut self, data: &[u8]) {
        match &mut self.handler {
            ProtocolHandler::Http(handler) => handler.write(data),
            ProtocolHandler::WebSocket(handler) => handler.write(data),
        }
    }

    /// Graceful close: the WebSocket close handshake, or a plain close.
    pub fn shutdown(&mut self) {
        match &mut self.handler {
            ProtocolHandler::Http(handler) => handler.close(),
            ProtocolHandler::WebSocket(handler) => handler.shutdown(),
        }
    }

    pub fn terminate(&mut self) {
        match &mut self.handler {
            ProtocolHandler::Http(handler) => handler.close(),
            ProtocolHandler::WebSocket(handler) => handler.terminate(),
        }
    }
}
