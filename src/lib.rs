pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod transport;

pub use agent::{DebugAgent, DebugBackend, EchoBackend, FrontendChannel, TargetRegistry};
pub use config::InspectorConfig;
pub use engine::{TaskRunner, TaskRunnerHandle};
pub use error::Error;
pub use server::{SocketServer, SocketServerDelegate};

pub type Result<T> = std::result::Result<T, Error>;

/// Lock a std mutex, recovering the data if another thread panicked
/// while holding it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
