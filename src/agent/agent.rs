//! Debug Agent
//!
//! One agent exists per debuggable target. It sits between two threads:
//!
//! ```text
//! I/O task  ──post_incoming──▶ [incoming queue] ──dispatch──▶ DebugBackend
//!                                                             (engine thread)
//! SocketServer ◀──send── [outgoing queue] ◀──write── FrontendChannel
//! ```
//!
//! The queues are the only state shared with the network side. `dispatch`
//! pops one entry at a time under the queue lock and handles it with the
//! lock released, so the backend may post or write while it runs.
//!
//! While the target is paused the engine thread parks in
//! [`DebugAgent::run_message_loop_on_pause`] and is woken for every batch of
//! frontend input until the backend resumes it.

use super::backend::{DebugBackend, FrontendChannel};
use super::state::{AgentState, DispatchPhase, Inbound, Lifecycle};
use crate::engine::EngineHandle;
use crate::{lock, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use tracing::{debug, error, info, trace, warn};

const RUN_IF_WAITING_FOR_DEBUGGER: &str = "Runtime.runIfWaitingForDebugger";
const CONTEXTS_CLEARED: &str = r#"{"method":"Runtime.executionContextsCleared"}"#;
const BREAK_ON_START: &str = "Break on start";

/// Where the agent's outgoing messages end up (the socket server).
pub trait OutboundSink: Send + Sync {
    /// An empty `message` asks for the session to be closed.
    fn send(&self, session_id: i32, message: String);
}

#[derive(Default)]
struct Queues {
    incoming: VecDeque<(i32, Inbound)>,
    outgoing: Vec<(i32, String)>,
}

struct TargetTitle {
    prefix: String,
    loaded_urls: Vec<String>,
}

pub struct DebugAgent {
    self_ref: Weak<DebugAgent>,
    engine: Arc<dyn EngineHandle>,
    backend: Arc<dyn DebugBackend>,
    sink: Mutex<Option<Arc<dyn OutboundSink>>>,

    queues: Mutex<Queues>,
    incoming_ready: Condvar,

    lifecycle: Mutex<Lifecycle>,
    phase: Mutex<DispatchPhase>,
    rejected_dispatches: AtomicUsize,

    waiting_for_resume: AtomicBool,
    running_nested_loop: AtomicBool,
    waiting_for_frontend: AtomicBool,

    title: Mutex<TargetTitle>,
}

/// Resets the dispatch phase when a dispatch pass ends, even by panic.
struct DispatchGuard<'a> {
    phase: &'a Mutex<DispatchPhase>,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut phase = lock(self.phase);
        if *phase != DispatchPhase::Busy && !std::thread::panicking() {
            panic!("dispatch phase released while {:?}", *phase);
        }
        *phase = DispatchPhase::Idle;
    }
}

/// Keep the last three path segments of a script URL. Anything with a
/// separator in it is marked as shortened.
fn shorten_url(url: &str) -> String {
    let separators: Vec<usize> = url
        .char_indices()
        .filter(|(_, c)| *c == '/' || *c == '\\')
        .map(|(i, _)| i)
        .collect();
    match separators.len() {
        0 => url.to_string(),
        n if n < 3 => format!("...{}", url),
        n => format!("...{}", &url[separators[n - 3] + 1..]),
    }
}

impl DebugAgent {
    pub fn new(
        backend: Arc<dyn DebugBackend>,
        engine: Arc<dyn EngineHandle>,
        title: impl Into<String>,
    ) -> Arc<Self> {
        let prefix = title.into();
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            engine,
            backend,
            sink: Mutex::new(None),
            queues: Mutex::new(Queues::default()),
            incoming_ready: Condvar::new(),
            lifecycle: Mutex::new(Lifecycle::new()),
            phase: Mutex::new(DispatchPhase::Idle),
            rejected_dispatches: AtomicUsize::new(0),
            waiting_for_resume: AtomicBool::new(false),
            running_nested_loop: AtomicBool::new(false),
            waiting_for_frontend: AtomicBool::new(false),
            title: Mutex::new(TargetTitle {
                prefix,
                loaded_urls: Vec::new(),
            }),
        })
    }

    /// Route outgoing messages to `sink` from now on.
    pub fn attach(&self, sink: Arc<dyn OutboundSink>) {
        *lock(&self.sink) = Some(sink);
    }

    /// The server is listening; frontends may attach.
    pub fn start(&self) -> Result<()> {
        lock(&self.lifecycle).start()
    }

    pub fn state(&self) -> AgentState {
        lock(&self.lifecycle).state()
    }

    pub fn session_id(&self) -> Option<i32> {
        lock(&self.lifecycle).session_id()
    }

    pub fn dispatch_phase(&self) -> DispatchPhase {
        *lock(&self.phase)
    }

    /// How many times `dispatch` was entered while already dispatching.
    pub fn rejected_dispatches(&self) -> usize {
        self.rejected_dispatches.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.running_nested_loop.load(Ordering::SeqCst)
    }

    pub fn title(&self) -> String {
        let title = lock(&self.title);
        if title.loaded_urls.is_empty() {
            title.prefix.clone()
        } else {
            format!("{} ({})", title.prefix, title.loaded_urls.join(", "))
        }
    }

    pub fn notify_loaded_url(&self, url: &str) {
        lock(&self.title).loaded_urls.push(shorten_url(url));
    }

    /// Queue input from the network side. Callable from any thread.
    pub fn post_incoming(&self, session_id: i32, inbound: Inbound) {
        trace!("Incoming for session {}: {:?}", session_id, inbound);
        let trigger_pumping = {
            let mut queues = lock(&self.queues);
            let was_empty = queues.incoming.is_empty();
            queues.incoming.push_back((session_id, inbound));
            was_empty
        };

        if trigger_pumping {
            let agent = self.self_ref.clone();
            self.engine.post_task(Box::new(move || {
                if let Some(agent) = agent.upgrade() {
                    agent.dispatch();
                }
            }));
            let agent = self.self_ref.clone();
            self.engine.request_interrupt(Box::new(move || {
                if let Some(agent) = agent.upgrade() {
                    agent.dispatch();
                }
            }));
        }
        self.incoming_ready.notify_all();
    }

    fn enter_dispatch(&self) -> Option<DispatchGuard<'_>> {
        let mut phase = lock(&self.phase);
        match *phase {
            DispatchPhase::Busy => None,
            DispatchPhase::Idle => {
                *phase = DispatchPhase::Busy;
                Some(DispatchGuard { phase: &self.phase })
            }
        }
    }

    /// Drain the incoming queue on the engine thread.
    ///
    /// Handling a message can make another dispatch request fire while this
    /// one is still running; such re-entry returns immediately and the
    /// outer pass picks the new messages up.
    ///
    /// Entries leave the queue one at a time. A pause loop entered while
    /// handling one of them keeps pumping the same queue, so it sees the
    /// rest in arrival order.
    pub fn dispatch(&self) {
        let Some(_guard) = self.enter_dispatch() else {
            self.rejected_dispatches.fetch_add(1, Ordering::SeqCst);
            trace!("dispatch already in progress");
            return;
        };

        loop {
            let next = lock(&self.queues).incoming.pop_front();
            let Some((session_id, inbound)) = next else {
                break;
            };
            self.handle_inbound(session_id, inbound);
        }
    }

    fn handle_inbound(&self, session_id: i32, inbound: Inbound) {
        match inbound {
            Inbound::Connect => {
                let (started, previous) = {
                    let mut lifecycle = lock(&self.lifecycle);
                    let previous = lifecycle.session_id();
                    (lifecycle.start_session(session_id), previous)
                };
                match started {
                    Ok(()) => {
                        info!("Frontend attached on session {}", session_id);
                        self.backend
                            .connect(FrontendChannel::new(self.self_ref.clone(), session_id));
                    }
                    Err(e) => {
                        error!("Rejecting session {}: {}", session_id, e);
                        self.close_session(session_id);
                        // The target is unusable now; drop the attached frontend too.
                        if let Some(previous) = previous.filter(|id| *id != session_id) {
                            warn!("Closing session {} after sequencing error", previous);
                            self.quit_message_loop_on_pause();
                            self.backend.disconnect();
                            self.close_session(previous);
                        }
                    }
                }
            }
            Inbound::Disconnect => {
                let ended = lock(&self.lifecycle).end_session(session_id);
                match ended {
                    Ok(true) => {
                        info!("Frontend detached from session {}", session_id);
                        self.quit_message_loop_on_pause();
                        self.backend.disconnect();
                    }
                    Ok(false) => debug!("Ignoring disconnect of stale session {}", session_id),
                    Err(e) => error!("Disconnect of session {}: {}", session_id, e),
                }
            }
            Inbound::Message(message) => {
                let current = {
                    let lifecycle = lock(&self.lifecycle);
                    lifecycle.is_connected() && lifecycle.session_id() == Some(session_id)
                };
                if !current {
                    warn!(
                        "Dropping message from session {} in state {:?}",
                        session_id,
                        self.state()
                    );
                    return;
                }
                if self.waiting_for_frontend.load(Ordering::SeqCst)
                    && message.contains(RUN_IF_WAITING_FOR_DEBUGGER)
                {
                    self.waiting_for_frontend.store(false, Ordering::SeqCst);
                }
                debug!("Dispatching to backend: {}", message);
                self.backend.dispatch(&message);
            }
        }
    }

    /// Send a message to the frontend of `session_id`.
    pub fn write(&self, session_id: i32, message: String) {
        let outgoing = {
            let mut queues = lock(&self.queues);
            queues.outgoing.push((session_id, message));
            std::mem::take(&mut queues.outgoing)
        };

        let sink = lock(&self.sink).clone();
        let Some(sink) = sink else {
            debug!("No server attached, dropping {} message(s)", outgoing.len());
            return;
        };
        for (session_id, message) in outgoing {
            trace!("Outgoing for session {}: {}", session_id, message);
            sink.send(session_id, message);
        }
    }

    fn close_session(&self, session_id: i32) {
        self.write(session_id, String::new());
    }

    fn wait_for_incoming(&self, keep_waiting: impl Fn() -> bool) {
        let queues = lock(&self.queues);
        let _queues = self
            .incoming_ready
            .wait_while(queues, |queues| queues.incoming.is_empty() && keep_waiting())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block the engine thread while the target is paused, pumping
    /// frontend messages until [`quit_message_loop_on_pause`] is called.
    ///
    /// [`quit_message_loop_on_pause`]: Self::quit_message_loop_on_pause
    pub fn run_message_loop_on_pause(&self) {
        self.waiting_for_resume.store(true, Ordering::SeqCst);
        if self.running_nested_loop.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Entering pause loop");

        // The loop may start from inside a dispatch pass; that pass is
        // suspended on this thread, so nested passes are allowed.
        let outer_phase = std::mem::replace(&mut *lock(&self.phase), DispatchPhase::Idle);

        while self.waiting_for_resume.load(Ordering::SeqCst) {
            self.wait_for_incoming(|| self.waiting_for_resume.load(Ordering::SeqCst));
            self.dispatch();
        }

        *lock(&self.phase) = outer_phase;
        self.running_nested_loop.store(false, Ordering::SeqCst);
        debug!("Leaving pause loop");
    }

    pub fn quit_message_loop_on_pause(&self) {
        {
            // Flip under the queue lock so a waiter cannot miss the wakeup.
            let _queues = lock(&self.queues);
            self.waiting_for_resume.store(false, Ordering::SeqCst);
        }
        self.incoming_ready.notify_all();
    }

    /// Ask the frontend to close and block until it has detached.
    pub fn wait_for_disconnect(&self) {
        let session_id = {
            let mut lifecycle = lock(&self.lifecycle);
            if !lifecycle.is_connected() {
                return;
            }
            lifecycle.request_shutdown();
            lifecycle.session_id()
        };
        if let Some(session_id) = session_id {
            info!("Waiting for frontend on session {} to disconnect", session_id);
            self.close_session(session_id);
        }
        self.run_message_loop_on_pause();
    }

    /// Block until a frontend is attached and has asked the target to run,
    /// then break on the first statement.
    pub fn wait_for_debugger(&self) {
        info!("Waiting for frontend message");
        self.waiting_for_frontend.store(true, Ordering::SeqCst);
        while self.waiting_for_frontend.load(Ordering::SeqCst) {
            self.wait_for_incoming(|| self.waiting_for_frontend.load(Ordering::SeqCst));
            self.dispatch();
            if self.state() == AgentState::Error {
                warn!("Agent failed while waiting for debugger");
                self.waiting_for_frontend.store(false, Ordering::SeqCst);
                return;
            }
        }
        self.backend.schedule_pause_on_next_statement(BREAK_ON_START);
        info!("Resuming after frontend attached");
    }

    /// Tear the target down, giving an attached frontend the chance to
    /// detach cleanly.
    pub fn stop(&self) {
        let session_id = {
            let lifecycle = lock(&self.lifecycle);
            lifecycle.session_id().filter(|_| lifecycle.is_connected())
        };
        match session_id {
            Some(session_id) => {
                self.write(session_id, CONTEXTS_CLEARED.to_string());
                self.wait_for_disconnect();
            }
            None => lock(&self.lifecycle).finish(),
        }
    }
}
