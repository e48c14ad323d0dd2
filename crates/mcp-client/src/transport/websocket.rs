//! WebSocket transport: one JSON-RPC message per text frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{decode_frame, HandlerRegistry, McpTransport, MessageStream, TransportError};
use crate::protocol::{self, JsonRpcMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) const TENANT_HEADER: &str = "X-Tenant-ID";

/// WebSocket transport to an MCP server at a `ws://` or `wss://` URL.
pub struct WebSocketTransport {
    url: String,
    headers: Vec<(String, String)>,
    sink: tokio::sync::Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: parking_lot::Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
    cancel: parking_lot::Mutex<CancellationToken>,
    handlers: HandlerRegistry,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            sink: tokio::sync::Mutex::new(None),
            stream: parking_lot::Mutex::new(None),
            connected: AtomicBool::new(false),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            handlers: HandlerRegistry::default(),
        }
    }

    /// Add a header to the opening handshake.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Identify the tenant via the `X-Tenant-ID` handshake header.
    pub fn with_tenant(self, tenant_id: impl Into<String>) -> Self {
        self.with_header(TENANT_HEADER, tenant_id)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl McpTransport for WebSocketTransport {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Err(TransportError::Connection("websocket transport is already connected".into()));
        }

        let mut request = self.url.as_str().into_client_request()?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Connection(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connection(format!("invalid header value for `{name}`: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        tracing::info!(url = %self.url, "connecting to MCP server over WebSocket");
        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        let (sink, stream) = ws.split();

        *self.sink.lock().await = Some(sink);
        *self.stream.lock() = Some(stream);
        *self.cancel.lock() = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().cancel();
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "error closing WebSocket");
            }
        }
        self.stream.lock().take();
        tracing::debug!(url = %self.url, "websocket transport disconnected");
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let json = protocol::serialize(message)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(json)).await?;
        Ok(())
    }

    fn receive_stream(&self) -> Result<MessageStream, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut frames = self.stream.lock().take().ok_or(TransportError::StreamTaken)?;
        let cancel = self.cancel.lock().clone();

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = frames.next() => next,
                };
                match next {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(message) = decode_frame("websocket", &text) {
                            yield message;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            if let Some(message) = decode_frame("websocket", text) {
                                yield message;
                            }
                        }
                        Err(_) => tracing::warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!(?frame, "websocket peer closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    // Abrupt closure ends the stream rather than failing it.
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket read failed, ending stream");
                        break;
                    }
                    None => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }
}
