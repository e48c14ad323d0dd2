//! Stdio transport: newline-delimited JSON over a pair of byte streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use tause_domain::config::McpServerConfig;

use super::{decode_frame, HandlerRegistry, McpTransport, MessageStream, TransportError};
use crate::protocol::{self, JsonRpcMessage};

type BoxReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where the byte streams come from when [`StdioTransport::connect`] runs.
enum StdioSource {
    /// Spawn a child process and talk to its stdin/stdout.
    Process {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// This process's own stdin/stdout.
    CurrentProcess,
    /// Caller-supplied streams, usable for exactly one connection.
    Streams(parking_lot::Mutex<Option<(BoxReader, BoxWriter)>>),
}

/// Stdio transport: each JSON-RPC message is a single newline-delimited line.
pub struct StdioTransport {
    source: StdioSource,
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    reader: parking_lot::Mutex<Option<BoxReader>>,
    child: tokio::sync::Mutex<Option<Child>>,
    connected: AtomicBool,
    cancel: parking_lot::Mutex<CancellationToken>,
    handlers: HandlerRegistry,
}

impl StdioTransport {
    fn with_source(source: StdioSource) -> Self {
        Self {
            source,
            writer: tokio::sync::Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            handlers: HandlerRegistry::default(),
        }
    }

    /// A transport that spawns `command` on connect.
    pub fn spawn(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self::with_source(StdioSource::Process {
            command: command.into(),
            args,
            env,
        })
    }

    /// A transport that spawns the process described by a server config.
    pub fn from_config(config: &McpServerConfig) -> Self {
        Self::spawn(config.command.clone(), config.args.clone(), config.env.clone())
    }

    /// A transport over this process's own stdin/stdout.
    pub fn current_process() -> Self {
        Self::with_source(StdioSource::CurrentProcess)
    }

    /// A transport over arbitrary async streams (pipes, sockets, in-memory duplexes).
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxReader = Box::new(BufReader::new(reader));
        let writer: BoxWriter = Box::new(writer);
        Self::with_source(StdioSource::Streams(parking_lot::Mutex::new(Some((reader, writer)))))
    }

    async fn open_streams(&self) -> Result<(BoxReader, BoxWriter), TransportError> {
        match &self.source {
            StdioSource::Process { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args)
                    .envs(env)
                    .stdin(std::process::Stdio::piped())
                    .stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::inherit())
                    .kill_on_drop(true);

                let mut child = cmd.spawn().map_err(|e| {
                    TransportError::Connection(format!("failed to spawn `{command}`: {e}"))
                })?;

                let stdin = child.stdin.take().ok_or_else(|| {
                    TransportError::Connection("failed to capture child stdin".into())
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    TransportError::Connection("failed to capture child stdout".into())
                })?;

                tracing::info!(command = %command, pid = ?child.id(), "spawned MCP server process");
                *self.child.lock().await = Some(child);
                Ok((Box::new(BufReader::new(stdout)), Box::new(stdin)))
            }
            StdioSource::CurrentProcess => Ok((
                Box::new(BufReader::new(tokio::io::stdin())),
                Box::new(tokio::io::stdout()),
            )),
            StdioSource::Streams(slot) => slot.lock().take().ok_or_else(|| {
                TransportError::Connection("stdio streams were already used by a previous connection".into())
            }),
        }
    }

    /// Wait briefly for the child to exit after stdin closed, then kill it.
    async fn reap_child(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        let waited = tokio::time::timeout(tokio::time::Duration::from_secs(5), child.wait()).await;
        match waited {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "MCP server process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for MCP server process");
            }
            Err(_) => {
                tracing::warn!("MCP server process did not exit within timeout, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server process");
                }
            }
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Err(TransportError::Connection("stdio transport is already connected".into()));
        }
        let (reader, writer) = self.open_streams().await?;
        *self.reader.lock() = Some(reader);
        *self.writer.lock().await = Some(writer);
        *self.cancel.lock() = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("stdio transport connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.lock().cancel();

        // Closing stdin signals the server to exit.
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "error closing stdio writer");
            }
        }
        self.reader.lock().take();
        self.reap_child().await;
        tracing::debug!("stdio transport disconnected");
    }

    async fn send(&self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let json = protocol::serialize(message)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        tracing::trace!(bytes = json.len(), "stdio frame sent");
        Ok(())
    }

    fn receive_stream(&self) -> Result<MessageStream, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let reader = self.reader.lock().take().ok_or(TransportError::StreamTaken)?;
        let cancel = self.cancel.lock().clone();

        let stream = async_stream::stream! {
            let mut lines = reader.lines();
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = lines.next_line() => next,
                };
                match next {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if let Some(message) = decode_frame("stdio", trimmed) {
                            yield message;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("stdio peer closed its output");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdio read failed, ending stream");
                        break;
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcNotification, JsonRpcRequest};
    use futures_util::StreamExt;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn pipe() -> (StdioTransport, tokio::io::DuplexStream) {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(ours);
        (StdioTransport::from_streams(r, w), theirs)
    }

    #[tokio::test]
    async fn send_writes_one_line_per_message() {
        let (transport, peer) = pipe();
        transport.connect().await.unwrap();

        let req = JsonRpcRequest::new("a", "tools/list", None);
        transport.send(&req.clone().into()).await.unwrap();
        transport
            .send(&JsonRpcNotification::new("notifications/initialized", None).into())
            .await
            .unwrap();

        let mut lines = BufReader::new(peer).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        let second = lines.next_line().await.unwrap().unwrap();
        assert_eq!(protocol::parse(&first).unwrap(), JsonRpcMessage::Request(req));
        assert!(second.contains("notifications/initialized"));
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let (transport, mut peer) = pipe();
        transport.connect().await.unwrap();
        let mut stream = transport.receive_stream().unwrap();

        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"first\"}\n").await.unwrap();
        peer.write_all(b"this is not json\n\n").await.unwrap();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"second\"}\n").await.unwrap();
        drop(peer);

        let methods: Vec<String> = stream
            .by_ref()
            .map(|m| m.method().unwrap().to_string())
            .collect()
            .await;
        assert_eq!(methods, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn stream_can_only_be_taken_once() {
        let (transport, _peer) = pipe();
        transport.connect().await.unwrap();
        let _stream = transport.receive_stream().unwrap();
        assert!(matches!(transport.receive_stream(), Err(TransportError::StreamTaken)));
    }

    #[tokio::test]
    async fn disconnect_ends_stream_and_is_idempotent() {
        let (transport, _peer) = pipe();
        transport.disconnect().await; // never connected: no-op

        transport.connect().await.unwrap();
        let mut stream = transport.receive_stream().unwrap();
        transport.disconnect().await;
        transport.disconnect().await;

        assert!(stream.next().await.is_none());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let (transport, _peer) = pipe();
        let msg: JsonRpcMessage = JsonRpcNotification::new("x", None).into();
        assert!(matches!(transport.send(&msg).await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn caller_streams_are_single_use() {
        let (transport, _peer) = pipe();
        transport.connect().await.unwrap();
        transport.disconnect().await;
        assert!(matches!(transport.connect().await, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn spawn_failure_is_connection_error() {
        let transport = StdioTransport::spawn("/definitely/not/a/real/binary", vec![], HashMap::new());
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
        assert!(!transport.is_connected());
    }
}
