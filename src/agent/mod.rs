pub mod agent;
pub mod backend;
pub mod registry;
pub mod state;

pub use agent::{DebugAgent, OutboundSink};
pub use backend::{DebugBackend, EchoBackend, FrontendChannel};
pub use registry::TargetRegistry;
pub use state::{AgentState, DispatchPhase, Inbound, Lifecycle};
