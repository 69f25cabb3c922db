use crate::agent::AgentState;
use crate::transport::websocket::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed HTTP request: {0}")]
    Http(String),

    #[error("Host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("WebSocket frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(i32),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Invalid session event {event} in state {state:?}")]
    InvalidState {
        event: &'static str,
        state: AgentState,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used when deciding how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad bytes from the peer; the connection is closed.
    Transport,
    /// A session event arrived in the wrong lifecycle state.
    Sequencing,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Http(_)
            | Error::HostNotAllowed(_)
            | Error::Frame(_)
            | Error::ConnectionClosed => ErrorKind::Transport,
            Error::InvalidState { .. } | Error::SessionNotFound(_) | Error::TargetNotFound(_) => {
                ErrorKind::Sequencing
            }
            Error::Json(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}
