pub mod delegate;
pub mod discovery;
pub mod socket_server;

pub use delegate::SocketServerDelegate;
pub use discovery::{TargetEntry, VersionInfo};
pub use socket_server::{ServerState, SocketServer};
