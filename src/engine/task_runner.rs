//! Foreground task runner for the engine thread.
//!
//! The script engine is single threaded. Other threads reach it through a
//! [`TaskRunnerHandle`]: plain tasks run in FIFO order, delayed tasks run
//! no earlier than their deadline, and interrupts run at the next point
//! where the engine polls for them (or on the next loop iteration when the
//! runner is idle).

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub type EngineTask = Box<dyn FnOnce() + Send + 'static>;

/// How the rest of the process schedules work onto the engine thread.
pub trait EngineHandle: Send + Sync {
    fn post_task(&self, task: EngineTask);

    /// Run `task` as soon as possible, even if the engine is busy
    /// executing script.
    fn request_interrupt(&self, task: EngineTask);
}

enum Command {
    Task(EngineTask),
    Delayed(EngineTask, Instant),
    Wake,
    Quit,
}

struct DelayedTask {
    deadline: Instant,
    seq: u64,
    task: EngineTask,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Interrupts {
    pending: Mutex<VecDeque<EngineTask>>,
    requested: AtomicBool,
}

#[derive(Clone)]
pub struct TaskRunnerHandle {
    tx: flume::Sender<Command>,
    interrupts: Arc<Interrupts>,
}

impl TaskRunnerHandle {
    pub fn post_delayed_task(&self, task: EngineTask, delay: Duration) {
        if delay.is_zero() {
            self.post_task(task);
            return;
        }
        let _ = self.tx.send(Command::Delayed(task, Instant::now() + delay));
    }

    pub fn quit(&self) {
        let _ = self.tx.send(Command::Quit);
    }

    /// Cheap check the engine can make between statements.
    pub fn interrupt_requested(&self) -> bool {
        self.interrupts.requested.load(Ordering::Acquire)
    }

    /// Run every pending interrupt on the calling (engine) thread.
    pub fn poll_interrupts(&self) -> usize {
        if !self.interrupts.requested.swap(false, Ordering::AcqRel) {
            return 0;
        }
        let mut ran = 0;
        loop {
            let next = match self.interrupts.pending.lock() {
                Ok(mut pending) => pending.pop_front(),
                Err(poisoned) => poisoned.into_inner().pop_front(),
            };
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        ran
    }
}

impl EngineHandle for TaskRunnerHandle {
    fn post_task(&self, task: EngineTask) {
        if self.tx.send(Command::Task(task)).is_err() {
            debug!("Engine task runner is gone, dropping task");
        }
    }

    fn request_interrupt(&self, task: EngineTask) {
        match self.interrupts.pending.lock() {
            Ok(mut pending) => pending.push_back(task),
            Err(poisoned) => poisoned.into_inner().push_back(task),
        }
        self.interrupts.requested.store(true, Ordering::Release);
        let _ = self.tx.send(Command::Wake);
    }
}

/// Owner side; lives on the engine thread.
pub struct TaskRunner {
    rx: flume::Receiver<Command>,
    handle: TaskRunnerHandle,
    delayed: BinaryHeap<DelayedTask>,
    next_seq: u64,
    quit: bool,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            rx,
            handle: TaskRunnerHandle {
                tx,
                interrupts: Arc::new(Interrupts::default()),
            },
            delayed: BinaryHeap::new(),
            next_seq: 0,
            quit: false,
        }
    }

    pub fn handle(&self) -> TaskRunnerHandle {
        self.handle.clone()
    }

    pub fn pending_delayed(&self) -> usize {
        self.delayed.len()
    }

    /// Run tasks until [`TaskRunnerHandle::quit`] is called.
    pub fn run(&mut self) {
        debug!("Engine task runner started");
        while !self.quit {
            self.handle.poll_interrupts();
            self.promote_due_tasks();

            let command = match self.delayed.peek() {
                Some(next) => {
                    let timeout = next.deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(timeout) {
                        Ok(command) => command,
                        Err(flume::RecvTimeoutError::Timeout) => continue,
                        Err(flume::RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };
            self.execute(command);
        }
        debug!("Engine task runner stopped");
    }

    /// Run everything that is ready right now; returns how many tasks ran.
    pub fn run_until_idle(&mut self) -> usize {
        let mut ran = self.handle.poll_interrupts();
        loop {
            ran += self.promote_due_tasks();
            match self.rx.try_recv() {
                Ok(command) => {
                    if matches!(command, Command::Task(_)) {
                        ran += 1;
                    }
                    self.execute(command);
                    ran += self.handle.poll_interrupts();
                }
                Err(_) => break,
            }
        }
        ran
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Task(task) => task(),
            Command::Delayed(task, deadline) => {
                trace!("Scheduling delayed task");
                self.delayed.push(DelayedTask {
                    deadline,
                    seq: self.next_seq,
                    task,
                });
                self.next_seq += 1;
            }
            Command::Wake => {
                self.handle.poll_interrupts();
            }
            Command::Quit => self.quit = true,
        }
    }

    /// Run delayed tasks whose deadline has passed.
    fn promote_due_tasks(&mut self) -> usize {
        let now = Instant::now();
        let mut ran = 0;
        while self.delayed.peek().is_some_and(|next| next.deadline <= now) {
            if let Some(due) = self.delayed.pop() {
                (due.task)();
                ran += 1;
            }
        }
        ran
    }
}
