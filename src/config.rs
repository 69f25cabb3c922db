/// Inspector server configuration
use std::net::SocketAddr;

use crate::{Error, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9229;
pub const DEFAULT_TITLE: &str = "Script Host";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectorConfig {
    /// Interface the listener binds to. Loopback unless overridden.
    pub host: String,
    /// TCP port; 0 lets the OS pick one (handy in tests).
    pub port: u16,
    /// Prefix of every target title shown in the discovery list.
    pub title: String,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

impl InspectorConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let ip = host
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid bind host '{}': {}", self.host, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
