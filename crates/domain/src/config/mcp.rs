//! MCP server connection configuration.
//!
//! These are plain config structs used to deserialize the `[[mcp.servers]]`
//! tables of the config file. The transports and the client that consume
//! them live in the `tause-mcp-client` crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// List of MCP server definitions.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

impl McpConfig {
    /// Look up a server definition by its id.
    pub fn server(&self, id: &str) -> Option<&McpServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }
}

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique identifier for this server (also used as the transport name).
    pub id: String,

    /// Transport type (`"stdio"`, `"websocket"` or `"sse"`).
    #[serde(default)]
    pub transport: McpTransportKind,

    /// The command to spawn for stdio servers (e.g. `"npx"`).
    #[serde(default)]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set on the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Endpoint URL for WebSocket (`ws://…`) and SSE (`http://…/events`) servers.
    #[serde(default)]
    pub url: Option<String>,

    /// Tenant identifier, sent as an `X-Tenant-ID` header on network transports.
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Extra HTTP headers for network transports.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Run the `initialize` handshake right after connecting.
    #[serde(default = "d_true")]
    pub auto_initialize: bool,

    /// Per-server override of `client.request_timeout_ms`.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl McpServerConfig {
    /// A stdio server definition with defaults for everything else.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            transport: McpTransportKind::Stdio,
            command: command.into(),
            args,
            env: HashMap::new(),
            url: None,
            tenant_id: None,
            headers: HashMap::new(),
            auto_initialize: true,
            request_timeout_ms: None,
        }
    }

    /// A network server definition (`websocket` or `sse`) pointing at `url`.
    pub fn remote(id: impl Into<String>, transport: McpTransportKind, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: Some(url.into()),
            ..Self::stdio(id, "", Vec::new())
        }
    }

    /// Check that the fields required by the selected transport are present.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("MCP server id must not be empty".into()));
        }
        match self.transport {
            McpTransportKind::Stdio => {
                if self.command.trim().is_empty() {
                    return Err(Error::Config(format!(
                        "MCP server '{}': stdio transport requires `command`",
                        self.id
                    )));
                }
            }
            McpTransportKind::WebSocket | McpTransportKind::Sse => {
                if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(Error::Config(format!(
                        "MCP server '{}': {} transport requires `url`",
                        self.id, self.transport
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Transport kind for connecting to an MCP server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    #[default]
    Stdio,
    #[serde(alias = "ws")]
    WebSocket,
    Sse,
}

impl std::fmt::Display for McpTransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::WebSocket => write!(f, "websocket"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

fn d_true() -> bool {
    true
}
