use crate::agent::OutboundSink;
use std::sync::Arc;

/// What the socket server needs to know about debug targets.
///
/// All methods are called from the server's I/O tasks and must not block.
pub trait SocketServerDelegate: Send + Sync {
    /// Called once when the server is created; `sink` routes replies back
    /// to sessions.
    fn assign_server(&self, sink: Arc<dyn OutboundSink>);

    /// A WebSocket session was established for `target_id`.
    fn start_session(&self, session_id: i32, target_id: &str);

    fn end_session(&self, session_id: i32);

    fn message_received(&self, session_id: i32, message: String);

    fn target_ids(&self) -> Vec<String>;

    fn target_title(&self, id: &str) -> String;

    fn target_url(&self, id: &str) -> String;
}
