//! MCP transport layer.
//!
//! A transport is a bidirectional channel of JSON-RPC frames:
//! - **Stdio**: newline-delimited JSON over a child process's (or our own)
//!   stdin/stdout.
//! - **WebSocket**: one JSON document per text frame.
//! - **Sse**: inbound `data:` lines over a long-lived GET, outbound via a
//!   separate POST per message.
//!
//! Each connection hands out its inbound side exactly once through
//! [`McpTransport::receive_stream`]; whoever takes it is the sole consumer
//! until the transport is reconnected.

mod sse;
mod stdio;
mod websocket;

pub use sse::SseTransport;
pub use stdio::StdioTransport;
pub use websocket::WebSocketTransport;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use parking_lot::RwLock;

use crate::protocol::{self, JsonRpcMessage};

/// Inbound messages of one connection. Ends when the peer closes or the
/// transport is disconnected.
pub type MessageStream = BoxStream<'static, JsonRpcMessage>;

/// Callback invoked for an inbound message routed through a [`HandlerRegistry`].
pub type MessageHandler = Arc<dyn Fn(JsonRpcMessage) + Send + Sync>;

/// Trait for MCP transports.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Short transport name for logs (`"stdio"`, `"websocket"`, `"sse"`).
    fn kind(&self) -> &'static str;

    /// Open the underlying channel.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the channel and release its resources. A no-op when not connected.
    async fn disconnect(&self);

    /// Serialize and write one message.
    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError>;

    /// Take the inbound side of the current connection.
    ///
    /// Fails with [`TransportError::StreamTaken`] if another consumer already
    /// holds it.
    fn receive_stream(&self) -> Result<MessageStream, TransportError>;

    /// Check if the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Per-method handlers consulted by the [`TransportManager`](crate::TransportManager).
    fn handlers(&self) -> &HandlerRegistry;

    /// Associate `handler` with inbound messages whose method is `method`
    /// (or [`ANY_MESSAGE`] for everything else, responses included).
    fn register_handler(&self, method: &str, handler: MessageHandler) {
        self.handlers().register(method, handler);
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport is not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("receive stream already taken for this connection")]
    StreamTaken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry key that matches any message without a more specific handler.
pub const ANY_MESSAGE: &str = "*";

/// Method name → handler table owned by a transport.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl HandlerRegistry {
    pub fn register(&self, method: impl Into<String>, handler: MessageHandler) {
        self.handlers.write().insert(method.into(), handler);
    }

    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.write().remove(method).is_some()
    }

    /// Find the handler for `message`: exact method match first, then [`ANY_MESSAGE`].
    pub fn resolve(&self, message: &JsonRpcMessage) -> Option<MessageHandler> {
        let handlers = self.handlers.read();
        message
            .method()
            .and_then(|m| handlers.get(m))
            .or_else(|| handlers.get(ANY_MESSAGE))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

/// Decode one inbound frame, logging and dropping it if it is malformed.
pub(crate) fn decode_frame(kind: &'static str, raw: &str) -> Option<JsonRpcMessage> {
    match protocol::parse(raw) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(
                transport = kind,
                code = e.code(),
                error = %e,
                frame = %truncate(raw, 200),
                "dropping malformed inbound frame"
            );
            None
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
