/// TCP listener for inspector frontends
///
/// Every accepted socket becomes a [`Connection`] (write side) and a
/// [`ConnectionReader`] (read side). The caller wraps the pair in an
/// [`InspectorSocket`](super::socket::InspectorSocket), which starts out
/// speaking HTTP.
use super::connection::{Connection, ConnectionReader};
use crate::{Error, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub struct Listener {
    listener: TcpListener,
    /// Address actually bound (port resolved when 0 was requested)
    pub local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("Failed to bind {}: {}", addr, e))))?;

        let local_addr = listener.local_addr()?;
        info!("📡 Inspector listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Wait for the next frontend connection
    pub async fn accept(&self) -> Result<(Connection, ConnectionReader)> {
        let (stream, addr) = self.listener.accept().await?;
        debug!("📥 New connection from {} on port {}", addr, self.port());
        Connection::accept(stream)
    }
}
