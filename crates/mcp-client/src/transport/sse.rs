//! SSE transport: half-duplex HTTP.
//!
//! Inbound frames arrive as `data: <json>` lines on a long-lived
//! `GET <endpoint>` (`Accept: text/event-stream`), terminated by a literal
//! `[DONE]` payload. Outbound frames are POSTed one per request to a sibling
//! endpoint derived by replacing `/events` with `/send`; sending never
//! touches the GET stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;

use super::websocket::TENANT_HEADER;
use super::{decode_frame, HandlerRegistry, McpTransport, MessageStream, TransportError};
use crate::protocol::{self, JsonRpcMessage};

/// Payload that marks the end of the event stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Derive the POST endpoint from the event-stream endpoint.
pub fn derive_send_url(endpoint_url: &str) -> String {
    endpoint_url.replace("/events", "/send")
}

/// SSE transport to an MCP server.
pub struct SseTransport {
    endpoint_url: String,
    send_url: String,
    http: reqwest::Client,
    headers: Vec<(String, String)>,
    response: parking_lot::Mutex<Option<reqwest::Response>>,
    connected: AtomicBool,
    cancel: parking_lot::Mutex<CancellationToken>,
    handlers: HandlerRegistry,
}

impl SseTransport {
    pub fn new(endpoint_url: impl Into<String>) -> Result<Self, TransportError> {
        let endpoint_url = endpoint_url.into();
        let send_url = derive_send_url(&endpoint_url);
        if send_url == endpoint_url {
            tracing::warn!(
                url = %endpoint_url,
                "SSE endpoint has no `/events` segment; POSTs will go to the same URL"
            );
        }

        // No overall timeout: the GET body is expected to stay open.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            endpoint_url,
            send_url,
            http,
            headers: Vec::new(),
            response: parking_lot::Mutex::new(None),
            connected: AtomicBool::new(false),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            handlers: HandlerRegistry::default(),
        })
    }

    /// Override the derived POST endpoint.
    pub fn with_send_url(mut self, send_url: impl Into<String>) -> Self {
        self.send_url = send_url.into();
        self
    }

    /// Add a header to every GET and POST.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Identify the tenant via the `X-Tenant-ID` header.
    pub fn with_tenant(self, tenant_id: impl Into<String>) -> Self {
        self.with_header(TENANT_HEADER, tenant_id)
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn send_url(&self) -> &str {
        &self.send_url
    }

    fn header_map(&self) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Connection(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Connection(format!("invalid header value for `{name}`: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> &'static str {
        "sse"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Err(TransportError::Connection("sse transport is already connected".into()));
        }

        tracing::info!(url = %self.endpoint_url, "opening MCP event stream");
        let response = self
            .http
            .get(&self.endpoint_url)
            .headers(self.header_map()?)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                url: self.endpoint_url.clone(),
            });
        }

        *self.response.lock() = Some(response);
        *self.cancel.lock() = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().cancel();
        // Dropping an unconsumed response closes the GET connection.
        self.response.lock().take();
        tracing::debug!(url = %self.endpoint_url, "sse transport disconnected");
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let body = protocol::serialize(message)?;
        let response = self
            .http
            .post(&self.send_url)
            .headers(self.header_map()?)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                url: self.send_url.clone(),
            });
        }
        Ok(())
    }

    fn receive_stream(&self) -> Result<MessageStream, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut response = self.response.lock().take().ok_or(TransportError::StreamTaken)?;
        let cancel = self.cancel.lock().clone();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            'read: loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => break,
                    chunk = response.chunk() => chunk,
                };
                let ended = match chunk {
                    Ok(Some(bytes)) => {
                        buffer.extend(bytes.iter().filter(|b| **b != b'\r'));
                        false
                    }
                    Ok(None) => {
                        // Flush a final line that lacks its newline.
                        if !buffer.is_empty() {
                            buffer.push(b'\n');
                        }
                        true
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "SSE read failed, ending stream");
                        break;
                    }
                };

                for data in drain_data_lines(&mut buffer) {
                    if data == DONE_SENTINEL {
                        tracing::debug!("SSE stream signalled completion");
                        break 'read;
                    }
                    if let Some(message) = decode_frame("sse", &data) {
                        yield message;
                    }
                }

                if ended {
                    tracing::debug!("SSE peer closed the event stream");
                    break;
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

/// Pull complete `data:` payloads out of `buffer`, leaving any trailing
/// partial line in place. Other SSE fields (`event:`, `id:`, `retry:`) and
/// comments are ignored.
pub(crate) fn drain_data_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        if let Some(data) = line.trim().strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                data_lines.push(data.to_string());
            }
        }
    }

    data_lines
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    fn send_url_replaces_events_segment() {
        assert_eq!(
            derive_send_url("http://localhost:8000/mcp/events?tenant=a"),
            "http://localhost:8000/mcp/send?tenant=a"
        );
        assert_eq!(derive_send_url("http://localhost/stream"), "http://localhost/stream");
    }

    #[test]
    fn drain_single_line() {
        let mut b = buf("data: {\"hello\":\"world\"}\n");
        assert_eq!(drain_data_lines(&mut b), vec!["{\"hello\":\"world\"}"]);
        assert!(b.is_empty());
    }

    #[test]
    fn drain_ignores_non_data_fields() {
        let mut b = buf("event: message\nid: 42\nretry: 5000\n: comment\ndata: payload\n\n");
        assert_eq!(drain_data_lines(&mut b), vec!["payload"]);
        assert!(b.is_empty());
    }

    #[test]
    fn drain_partial_line_stays_in_buffer() {
        let mut b = buf("data: complete\ndata: parti");
        assert_eq!(drain_data_lines(&mut b), vec!["complete"]);
        assert_eq!(b, buf("data: parti"));

        b.extend_from_slice(b"al\n");
        assert_eq!(drain_data_lines(&mut b), vec!["partial"]);
    }

    #[test]
    fn drain_keeps_done_sentinel() {
        let mut b = buf("data: [DONE]\n");
        assert_eq!(drain_data_lines(&mut b), vec![DONE_SENTINEL]);
    }

    #[test]
    fn drain_handles_multibyte_split_across_chunks() {
        let text = "data: {\"t\":\"é\"}\n".as_bytes().to_vec();
        let split_at = text.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut b = text[..split_at].to_vec();
        assert!(drain_data_lines(&mut b).is_empty());
        b.extend_from_slice(&text[split_at..]);
        assert_eq!(drain_data_lines(&mut b), vec!["{\"t\":\"é\"}"]);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let transport = SseTransport::new("http://127.0.0.1:1/events").unwrap();
        let msg: JsonRpcMessage = crate::protocol::JsonRpcNotification::new("x", None).into();
        assert!(matches!(transport.send(&msg).await, Err(TransportError::NotConnected)));
        assert_eq!(transport.send_url(), "http://127.0.0.1:1/send");
    }
}
