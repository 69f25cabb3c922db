use super::agent::{DebugAgent, OutboundSink};
use super::state::Inbound;
use crate::server::SocketServerDelegate;
use crate::{lock, Error};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Maps target ids and live sessions to their debug agents.
#[derive(Default)]
pub struct TargetRegistry {
    targets: Mutex<BTreeMap<String, Arc<DebugAgent>>>,
    sessions: Mutex<HashMap<i32, Arc<DebugAgent>>>,
    sink: Mutex<Option<Arc<dyn OutboundSink>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` and return its fresh target id.
    pub fn add_target(&self, agent: Arc<DebugAgent>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        if let Some(sink) = lock(&self.sink).clone() {
            agent.attach(sink);
        }
        info!("Registered target {} ({})", id, agent.title());
        lock(&self.targets).insert(id.clone(), agent);
        id
    }

    pub fn remove_target(&self, id: &str) -> Option<Arc<DebugAgent>> {
        lock(&self.targets).remove(id)
    }

    pub fn target(&self, id: &str) -> Option<Arc<DebugAgent>> {
        lock(&self.targets).get(id).cloned()
    }

    fn session_agent(&self, session_id: i32) -> Option<Arc<DebugAgent>> {
        let agent = lock(&self.sessions).get(&session_id).cloned();
        if agent.is_none() {
            warn!("{}", Error::SessionNotFound(session_id));
        }
        agent
    }
}

impl SocketServerDelegate for TargetRegistry {
    fn assign_server(&self, sink: Arc<dyn OutboundSink>) {
        for agent in lock(&self.targets).values() {
            agent.attach(sink.clone());
        }
        *lock(&self.sink) = Some(sink);
    }

    fn start_session(&self, session_id: i32, target_id: &str) {
        let Some(agent) = self.target(target_id) else {
            warn!("{}", Error::TargetNotFound(target_id.to_string()));
            return;
        };
        lock(&self.sessions).insert(session_id, agent.clone());
        agent.post_incoming(session_id, Inbound::Connect);
    }

    fn end_session(&self, session_id: i32) {
        let agent = lock(&self.sessions).remove(&session_id);
        match agent {
            Some(agent) => agent.post_incoming(session_id, Inbound::Disconnect),
            None => debug!("End of unregistered session {}", session_id),
        }
    }

    fn message_received(&self, session_id: i32, message: String) {
        if let Some(agent) = self.session_agent(session_id) {
            agent.post_incoming(session_id, Inbound::Message(message));
        }
    }

    fn target_ids(&self) -> Vec<String> {
        lock(&self.targets).keys().cloned().collect()
    }

    fn target_title(&self, id: &str) -> String {
        self.target(id).map(|agent| agent.title()).unwrap_or_default()
    }

    fn target_url(&self, id: &str) -> String {
        format!("file://{}", id)
    }
}
