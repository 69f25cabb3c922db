//! Session registry
//!
//! Owns the listener and one I/O task per accepted connection. Each task
//! drives its [`InspectorSocket`] from two inputs: bytes read from the
//! peer and commands queued through [`SocketServer::send`]. Everything the
//! peer says is forwarded to the [`SocketServerDelegate`].

use super::delegate::SocketServerDelegate;
use super::discovery::{TargetEntry, VersionInfo};
use crate::agent::OutboundSink;
use crate::config::InspectorConfig;
use crate::transport::http::json_response;
use crate::transport::{Connection, ConnectionReader, InspectorSocket, Listener, ReadEvent, SocketEvent};
use crate::{lock, Error, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    New,
    Running,
    /// No longer accepting; waiting for live sessions to end.
    Stopping,
    Stopped,
}

#[derive(Debug)]
enum SessionCommand {
    Message(String),
    /// Graceful close (WebSocket close handshake).
    Close,
    Terminate,
}

struct SessionEntry {
    target_id: Option<String>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

pub struct SocketServer {
    config: InspectorConfig,
    delegate: Arc<dyn SocketServerDelegate>,
    state: Mutex<ServerState>,
    stopped: Notify,
    port: AtomicU16,
    next_session_id: AtomicI32,
    sessions: Mutex<HashMap<i32, SessionEntry>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handed to the delegate; does not keep the server alive.
struct ServerSink {
    server: Weak<SocketServer>,
}

impl OutboundSink for ServerSink {
    fn send(&self, session_id: i32, message: String) {
        match self.server.upgrade() {
            Some(server) => server.send(session_id, message),
            None => debug!("Server gone, dropping message for session {}", session_id),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value)
        .map_err(|e| error!("Failed to serialize discovery response: {}", e))
        .ok()
}

async fn accept_loop(listener: Listener, server: Weak<SocketServer>) {
    loop {
        let accepted = listener.accept().await;
        let Some(server) = server.upgrade() else {
            break;
        };
        match accepted {
            Ok((connection, reader)) => server.spawn_session(connection, reader),
            Err(e) => warn!("Failed to accept connection: {}", e),
        }
    }
}

impl SocketServer {
    pub fn new(config: InspectorConfig, delegate: Arc<dyn SocketServerDelegate>) -> Arc<Self> {
        let server = Arc::new(Self {
            config,
            delegate,
            state: Mutex::new(ServerState::New),
            stopped: Notify::new(),
            port: AtomicU16::new(0),
            next_session_id: AtomicI32::new(1),
            sessions: Mutex::new(HashMap::new()),
            accept_task: Mutex::new(None),
        });
        server.delegate.assign_server(Arc::new(ServerSink {
            server: Arc::downgrade(&server),
        }));
        server
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    /// Bound port, 0 before [`start`](Self::start).
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Bind the listener and start accepting. Returns the bound port.
    pub async fn start(self: &Arc<Self>) -> Result<u16> {
        let state = self.state();
        if state != ServerState::New {
            return Err(Error::Internal(format!(
                "Server cannot start in state {:?}",
                state
            )));
        }

        let listener = Listener::bind(self.config.bind_address()?).await?;
        let port = listener.port();
        self.port.store(port, Ordering::SeqCst);
        *lock(&self.state) = ServerState::Running;

        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(self)));
        *lock(&self.accept_task) = Some(task);
        info!("Inspector server running on port {}", port);
        Ok(port)
    }

    /// Stop accepting. Live sessions keep running until they end or
    /// [`terminate_connections`](Self::terminate_connections) is called.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state != ServerState::Running {
                return;
            }
            *state = ServerState::Stopping;
        }
        if let Some(task) = lock(&self.accept_task).take() {
            task.abort();
        }
        info!("Inspector server stopping");
        self.check_stopped();
    }

    /// Resolves once the server reached [`ServerState::Stopped`].
    pub async fn wait_stopped(&self) {
        loop {
            let notified = self.stopped.notified();
            if self.state() == ServerState::Stopped {
                return;
            }
            notified.await;
        }
    }

    /// Queue `message` for `session_id`. An empty message closes the
    /// session gracefully.
    pub fn send(&self, session_id: i32, message: String) {
        let command = if message.is_empty() {
            SessionCommand::Close
        } else {
            SessionCommand::Message(message)
        };
        match lock(&self.sessions).get(&session_id) {
            Some(entry) => {
                if entry.commands.send(command).is_err() {
                    debug!("Session {} is shutting down", session_id);
                }
            }
            None => debug!("Dropping {:?} for unknown session {}", command, session_id),
        }
    }

    /// Drop every connection without a close handshake.
    pub fn terminate_connections(&self) {
        let sessions = lock(&self.sessions);
        info!("Terminating {} connection(s)", sessions.len());
        for entry in sessions.values() {
            let _ = entry.commands.send(SessionCommand::Terminate);
        }
    }

    /// Body for a discovery GET, `None` if the path is not served.
    pub fn handle_get_request(&self, host: &str, path: &str) -> Option<String> {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        match path.trim_end_matches('/') {
            "/json" | "/json/list" => to_json(&self.target_list(host)),
            "/json/version" => to_json(&VersionInfo::default()),
            _ => None,
        }
    }

    fn target_list(&self, host: &str) -> Vec<TargetEntry> {
        let address = if host.is_empty() {
            match self.config.bind_address() {
                Ok(addr) => SocketAddr::new(addr.ip(), self.port()).to_string(),
                Err(_) => format!("{}:{}", self.config.host, self.port()),
            }
        } else {
            host.to_string()
        };
        let attached: HashSet<String> = lock(&self.sessions)
            .values()
            .filter_map(|entry| entry.target_id.clone())
            .collect();

        self.delegate
            .target_ids()
            .into_iter()
            .map(|id| {
                TargetEntry::new(
                    &id,
                    self.delegate.target_title(&id),
                    self.delegate.target_url(&id),
                    &address,
                    attached.contains(&id),
                )
            })
            .collect()
    }

    fn spawn_session(self: &Arc<Self>, connection: Connection, reader: ConnectionReader) {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        let (commands, command_rx) = mpsc::unbounded_channel();
        lock(&self.sessions).insert(
            session_id,
            SessionEntry {
                target_id: None,
                commands,
            },
        );
        debug!("Session {} accepted from {:?}", session_id, connection.peer());

        let server = self.clone();
        let socket = InspectorSocket::accept(connection);
        tokio::spawn(async move {
            server
                .run_session(session_id, socket, reader, command_rx)
                .await;
        });
    }

    async fn run_session(
        &self,
        session_id: i32,
        mut socket: InspectorSocket,
        mut reader: ConnectionReader,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        while !socket.is_closed() {
            tokio::select! {
                read = reader.read() => match read {
                    Ok(ReadEvent::Data(bytes)) => {
                        let events = socket.on_data(&bytes);
                        self.handle_events(session_id, &mut socket, events);
                    }
                    Ok(ReadEvent::Eof) => {
                        debug!("Session {} reached end of stream", session_id);
                        socket.on_eof();
                    }
                    Err(e) => {
                        warn!("Read error on session {}: {}", session_id, e);
                        socket.terminate();
                    }
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::Message(message)) => socket.write(message.as_bytes()),
                    Some(SessionCommand::Close) => socket.shutdown(),
                    Some(SessionCommand::Terminate) | None => socket.terminate(),
                },
            }
        }
        self.session_terminated(session_id);
    }

    fn handle_events(&self, session_id: i32, socket: &mut InspectorSocket, events: Vec<SocketEvent>) {
        let mut pending: VecDeque<SocketEvent> = events.into();
        while let Some(event) = pending.pop_front() {
            match event {
                SocketEvent::HttpGet { host, path } => match self.handle_get_request(&host, &path) {
                    Some(body) => {
                        // HTTP/1.0: the response ends with the connection.
                        socket.write(&json_response(&body));
                        socket.shutdown();
                        return;
                    }
                    None => {
                        warn!("No discovery endpoint at {}", path);
                        socket.cancel_handshake();
                        return;
                    }
                },
                SocketEvent::Upgrade { path, ws_key, .. } => {
                    let target_id = path.trim_start_matches('/');
                    if !self.delegate.target_ids().iter().any(|id| id == target_id) {
                        warn!("Rejecting upgrade: {}", Error::TargetNotFound(target_id.to_string()));
                        socket.cancel_handshake();
                        return;
                    }
                    match socket.accept_upgrade(&ws_key) {
                        Ok(replayed) => {
                            self.session_started(session_id, target_id);
                            pending.extend(replayed);
                        }
                        Err(e) => {
                            warn!("Upgrade of session {} failed: {}", session_id, e);
                            socket.terminate();
                            return;
                        }
                    }
                }
                SocketEvent::Message(message) => self.delegate.message_received(session_id, message),
            }
        }
    }

    fn session_started(&self, session_id: i32, target_id: &str) {
        if let Some(entry) = lock(&self.sessions).get_mut(&session_id) {
            entry.target_id = Some(target_id.to_string());
        }
        info!("Session {} attached to target {}", session_id, target_id);
        self.delegate.start_session(session_id, target_id);
    }

    fn session_terminated(&self, session_id: i32) {
        let entry = lock(&self.sessions).remove(&session_id);
        if let Some(SessionEntry {
            target_id: Some(target_id),
            ..
        }) = entry
        {
            info!("Session {} detached from target {}", session_id, target_id);
            self.delegate.end_session(session_id);
        } else {
            debug!("Connection of session {} closed", session_id);
        }
        self.check_stopped();
    }

    fn check_stopped(&self) {
        let idle = lock(&self.sessions).is_empty();
        let mut state = lock(&self.state);
        if *state == ServerState::Stopping && idle {
            *state = ServerState::Stopped;
            info!("Inspector server stopped");
            self.stopped.notify_waiters();
        }
    }
}
