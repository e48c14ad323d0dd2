//! `tause-mcp-client`: MCP (Model Context Protocol) client.
//!
//! This crate provides:
//! - JSON-RPC 2.0 message types with structural parsing ([`protocol`]).
//! - Typed MCP payloads: tools, resources, prompts, sampling ([`types`]).
//! - Stdio, WebSocket and SSE transports behind one [`McpTransport`] trait.
//! - A [`TransportManager`] that owns several named transports and fans
//!   messages out to all of them.
//! - An [`McpClient`] that runs the `initialize` handshake and correlates
//!   requests with responses, plus an [`McpClientFactory`] that builds
//!   clients from config.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tause_mcp_client::{McpClientFactory, McpServerConfig};
//!
//! let factory = McpClientFactory::new(config.client.clone());
//! let server = McpServerConfig::stdio("fs", "npx", vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into()]);
//! let client = factory.connect(&server).await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! let result = client.call_tool("read_file", json!({"path": "/tmp/test.txt"})).await?;
//! client.disconnect().await;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod manager;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-exports for convenience.
pub use client::{ClientOptions, McpClient, ServerSession, SessionState};
pub use config::{ClientConfig, McpConfig, McpServerConfig, McpTransportKind, ProtocolVersionFormat};
pub use error::McpError;
pub use factory::McpClientFactory;
pub use manager::TransportManager;
pub use protocol::{JsonRpcError, JsonRpcMessage, RequestId};
pub use transport::{McpTransport, SseTransport, StdioTransport, TransportError, WebSocketTransport};
