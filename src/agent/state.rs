use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Session lifecycle of one debug target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    New,
    /// Listening, no frontend attached.
    Accepting,
    Connected,
    Done,
    Error,
}

/// Whether the agent is currently pumping incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    Busy,
}

/// One entry of the incoming queue.
///
/// Connect and disconnect never come from the wire; they are queued next
/// to real messages so lifecycle changes keep their place in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Connect,
    Disconnect,
    Message(String),
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: AgentState,
    session_id: Option<i32>,
    shutting_down: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AgentState::New,
            session_id: None,
            shutting_down: false,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn session_id(&self) -> Option<i32> {
        self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.state == AgentState::Connected
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn request_shutdown(&mut self) {
        self.shutting_down = true;
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            AgentState::New => {
                self.transition(AgentState::Accepting);
                Ok(())
            }
            AgentState::Accepting => Ok(()),
            state => Err(self.fail("Start", state)),
        }
    }

    pub fn start_session(&mut self, session_id: i32) -> Result<()> {
        match self.state {
            AgentState::Accepting => {
                self.session_id = Some(session_id);
                self.transition(AgentState::Connected);
                Ok(())
            }
            state => Err(self.fail("StartSession", state)),
        }
    }

    /// Returns `Ok(false)` for a disconnect of a session that is not the
    /// current one; such stale events leave the state alone.
    pub fn end_session(&mut self, session_id: i32) -> Result<bool> {
        match self.state {
            AgentState::Connected if self.session_id != Some(session_id) => Ok(false),
            AgentState::Connected => {
                self.session_id = None;
                let next = if self.shutting_down {
                    AgentState::Done
                } else {
                    AgentState::Accepting
                };
                self.transition(next);
                Ok(true)
            }
            state => Err(self.fail("EndSession", state)),
        }
    }

    /// Stop without a frontend attached.
    pub fn finish(&mut self) {
        if self.state != AgentState::Error {
            self.transition(AgentState::Done);
        }
    }

    fn transition(&mut self, next: AgentState) {
        info!("Debug agent {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, event: &'static str, state: AgentState) -> Error {
        error!("Session event {} is invalid in state {:?}", event, state);
        self.state = AgentState::Error;
        Error::InvalidState { event, state }
    }
}
