pub mod connection;
pub mod http;
pub mod listener;
pub mod socket;
pub mod websocket;

pub use connection::{Connection, ConnectionReader, ReadEvent};
pub use listener::Listener;
pub use socket::{InspectorSocket, ProtocolHandler, SocketEvent};
