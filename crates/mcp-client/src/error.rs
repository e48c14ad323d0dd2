//! Errors surfaced by the MCP client, manager and factory.

use std::time::Duration;

use crate::protocol::{JsonRpcError, ParseError};
use crate::transport::TransportError;

/// Errors specific to MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("MCP request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The request was abandoned because the session was torn down.
    #[error("MCP request `{method}` was cancelled")]
    Cancelled { method: String },

    /// The peer answered with a JSON-RPC error object.
    #[error("MCP `{method}` failed: {error}")]
    Rpc { method: String, error: JsonRpcError },

    /// The call is not allowed in the client's current session state.
    #[error("MCP client state error: {0}")]
    State(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP transport not found: {0}")]
    TransportNotFound(String),

    #[error("MCP transport already registered: {0}")]
    DuplicateTransport(String),

    #[error("MCP config error: {0}")]
    Config(String),
}

impl McpError {
    /// The server-side JSON-RPC error code, for [`McpError::Rpc`].
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { error, .. } => Some(error.code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<tause_domain::error::Error> for McpError {
    fn from(e: tause_domain::error::Error) -> Self {
        McpError::Config(e.to_string())
    }
}

impl From<McpError> for tause_domain::error::Error {
    fn from(e: McpError) -> Self {
        tause_domain::error::Error::Other(e.to_string())
    }
}
