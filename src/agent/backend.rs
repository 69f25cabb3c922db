use super::agent::DebugAgent;
use std::sync::{Mutex, Weak};
use tracing::debug;

/// The in-process side of the debugging protocol.
///
/// Every call happens on the engine thread. Payloads are opaque to the
/// transport and are passed through unmodified.
pub trait DebugBackend: Send + Sync {
    /// A frontend attached. Replies and notifications go out through `channel`.
    fn connect(&self, channel: FrontendChannel);

    fn disconnect(&self);

    fn dispatch(&self, message: &str);

    fn schedule_pause_on_next_statement(&self, _reason: &str) {}
}

/// Backend's handle back to the frontend of one session.
#[derive(Clone)]
pub struct FrontendChannel {
    agent: Weak<DebugAgent>,
    session_id: i32,
}

impl FrontendChannel {
    pub(crate) fn new(agent: Weak<DebugAgent>, session_id: i32) -> Self {
        Self { agent, session_id }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn send(&self, message: impl Into<String>) {
        match self.agent.upgrade() {
            Some(agent) => agent.write(self.session_id, message.into()),
            None => debug!("Agent gone, dropping message for session {}", self.session_id),
        }
    }

    /// Enter the pause loop; returns once [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        if let Some(agent) = self.agent.upgrade() {
            agent.run_message_loop_on_pause();
        }
    }

    pub fn resume(&self) {
        if let Some(agent) = self.agent.upgrade() {
            agent.quit_message_loop_on_pause();
        }
    }
}

/// Sends every frontend message straight back. Used by the `serve`
/// command to smoke-test frontends against the transport.
#[derive(Default)]
pub struct EchoBackend {
    channel: Mutex<Option<FrontendChannel>>,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebugBackend for EchoBackend {
    fn connect(&self, channel: FrontendChannel) {
        if let Ok(mut slot) = self.channel.lock() {
            *slot = Some(channel);
        }
    }

    fn disconnect(&self) {
        if let Ok(mut slot) = self.channel.lock() {
            *slot = None;
        }
    }

    fn dispatch(&self, message: &str) {
        let channel = self.channel.lock().ok().and_then(|slot| slot.clone());
        if let Some(channel) = channel {
            channel.send(message);
        }
    }
}
