//! JSON documents served on the HTTP discovery endpoints.

use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.1";
const TARGET_TYPE: &str = "node";
const FRONTEND_PAGE: &str = "devtools://devtools/bundled/js_app.html?experiments=true&v8only=true";

/// One entry of `/json/list`.
///
/// The debugger URLs are omitted while a frontend is attached, since a
/// target accepts a single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEntry {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devtools_frontend_url: Option<String>,
    pub favicon_url: String,
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetEntry {
    /// `address` is `host:port` as the frontend should dial it.
    pub fn new(id: &str, title: String, url: String, address: &str, attached: bool) -> Self {
        let (frontend, debugger) = if attached {
            (None, None)
        } else {
            let target_address = format!("{}/{}", address, id);
            (
                Some(format!("{}&ws={}", FRONTEND_PAGE, target_address)),
                Some(format!("ws://{}", target_address)),
            )
        };
        Self {
            description: format!("{} instance", env!("CARGO_PKG_NAME")),
            devtools_frontend_url: frontend,
            favicon_url: String::new(),
            id: id.to_string(),
            title,
            target_type: TARGET_TYPE.to_string(),
            url,
            web_socket_debugger_url: debugger,
        }
    }
}

/// Body of `/json/version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            browser: format!("{}/v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}
