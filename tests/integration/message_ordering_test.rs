//! Many producers post into one agent while the engine thread dispatches.
//! Nothing may be dropped and each producer's messages keep their order.

use script_inspector::agent::{AgentState, Inbound};
use script_inspector::server::SocketServerDelegate;
use script_inspector::{DebugAgent, DebugBackend, FrontendChannel, TargetRegistry, TaskRunner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const PRODUCERS: usize = 8;
const MESSAGES_PER_PRODUCER: usize = 500;

#[derive(Default)]
struct CollectingBackend {
    received: Mutex<Vec<String>>,
}

impl DebugBackend for CollectingBackend {
    fn connect(&self, _channel: FrontendChannel) {}

    fn disconnect(&self) {}

    fn dispatch(&self, message: &str) {
        // Give producers a chance to pile up behind a running dispatch.
        if message.ends_with("-0") {
            thread::sleep(Duration::from_millis(1));
        }
        self.received.lock().unwrap().push(message.to_string());
    }
}

fn wait_for(count: usize, backend: &CollectingBackend) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let received = backend.received.lock().unwrap().clone();
        if received.len() >= count || Instant::now() > deadline {
            return received;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn assert_per_producer_order(received: &[String]) {
    let mut last_seen: HashMap<&str, usize> = HashMap::new();
    for message in received {
        let (producer, seq) = message.rsplit_once('-').unwrap();
        let seq: usize = seq.parse().unwrap();
        if let Some(previous) = last_seen.insert(producer, seq) {
            assert_eq!(seq, previous + 1, "producer {} out of order", producer);
        } else {
            assert_eq!(seq, 0, "producer {} lost its first message", producer);
        }
    }
}

fn spawn_engine() -> (script_inspector::TaskRunnerHandle, thread::JoinHandle<()>) {
    let mut runner = TaskRunner::new();
    let handle = runner.handle();
    (handle, thread::spawn(move || runner.run()))
}

#[test]
fn test_concurrent_producers_keep_order() {
    let (engine, engine_thread) = spawn_engine();
    let backend = Arc::new(CollectingBackend::default());
    let agent = DebugAgent::new(backend.clone(), Arc::new(engine.clone()), "Ordering");
    agent.start().unwrap();
    agent.post_incoming(1, Inbound::Connect);

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let agent = agent.clone();
            thread::spawn(move || {
                for seq in 0..MESSAGES_PER_PRODUCER {
                    agent.post_incoming(1, Inbound::Message(format!("p{}-{}", p, seq)));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let received = wait_for(PRODUCERS * MESSAGES_PER_PRODUCER, &backend);
    assert_eq!(received.len(), PRODUCERS * MESSAGES_PER_PRODUCER);
    assert_per_producer_order(&received);
    assert_eq!(agent.state(), AgentState::Connected);

    engine.quit();
    engine_thread.join().unwrap();
}

#[test]
fn test_registry_delivers_session_traffic_in_order() {
    let (engine, engine_thread) = spawn_engine();
    let backend = Arc::new(CollectingBackend::default());
    let agent = DebugAgent::new(backend.clone(), Arc::new(engine.clone()), "Ordering");
    agent.start().unwrap();

    let registry = Arc::new(TargetRegistry::new());
    let target = registry.add_target(agent.clone());
    registry.start_session(3, &target);

    let writers: Vec<_> = (0..4)
        .map(|p| {
            let registry = registry.clone();
            thread::spawn(move || {
                for seq in 0..250 {
                    registry.message_received(3, format!("w{}-{}", p, seq));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    registry.end_session(3);

    let received = wait_for(1000, &backend);
    assert_eq!(received.len(), 1000);
    assert_per_producer_order(&received);

    let deadline = Instant::now() + Duration::from_secs(5);
    while agent.state() != AgentState::Accepting && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(agent.state(), AgentState::Accepting);

    engine.quit();
    engine_thread.join().unwrap();
}
