//! Transport manager: a named registry of connected transports with one
//! receive task per transport and best-effort fan-out.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::McpError;
use crate::protocol::JsonRpcMessage;
use crate::transport::{McpTransport, MessageStream};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ManagedTransport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A registered transport and the task draining its receive stream.
struct ManagedTransport {
    transport: Arc<dyn McpTransport>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ManagedTransport {
    /// Stop the receive task, wait for it, then close the transport.
    async fn shutdown(self, name: &str) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(transport = %name, error = %e, "receive task ended abnormally");
        }
        self.transport.disconnect().await;
        tracing::info!(transport = %name, "MCP transport removed");
    }
}

/// Pull messages off `stream` and hand each to the transport's registered
/// handler, in arrival order. A panicking handler loses only its message.
async fn receive_loop(
    name: String,
    transport: Arc<dyn McpTransport>,
    mut stream: MessageStream,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        let Some(message) = next else {
            tracing::debug!(transport = %name, "inbound stream ended");
            return;
        };
        match transport.handlers().resolve(&message) {
            Some(handler) => {
                let method = message.method().unwrap_or("<response>").to_string();
                if std::panic::catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                    tracing::error!(transport = %name, method = %method, "inbound message handler panicked");
                }
            }
            None => tracing::debug!(
                transport = %name,
                method = message.method().unwrap_or("<response>"),
                "no handler for inbound message, dropping"
            ),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TransportManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Manager that holds named transports.
#[derive(Default)]
pub struct TransportManager {
    transports: Mutex<HashMap<String, ManagedTransport>>,
}

impl TransportManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `transport` and start draining its receive stream.
    ///
    /// On a connect failure the transport is not registered.
    pub async fn add_transport(
        &self,
        name: impl Into<String>,
        transport: Arc<dyn McpTransport>,
    ) -> Result<(), McpError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(McpError::DuplicateTransport(name));
        }

        transport.connect().await?;
        let stream = match transport.receive_stream() {
            Ok(stream) => stream,
            Err(e) => {
                transport.disconnect().await;
                return Err(e.into());
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            name.clone(),
            Arc::clone(&transport),
            stream,
            cancel.clone(),
        ));
        let managed = ManagedTransport {
            transport,
            cancel,
            task,
        };

        // A concurrent add may have won the name while we were connecting.
        let rejected = {
            let mut transports = self.transports.lock();
            if transports.contains_key(&name) {
                Some(managed)
            } else {
                transports.insert(name.clone(), managed);
                None
            }
        };
        if let Some(managed) = rejected {
            managed.shutdown(&name).await;
            return Err(McpError::DuplicateTransport(name));
        }

        tracing::info!(transport = %name, "MCP transport registered");
        Ok(())
    }

    /// Stop and disconnect the transport named `name`. No-op if unknown.
    pub async fn remove_transport(&self, name: &str) {
        let managed = self.transports.lock().remove(name);
        if let Some(managed) = managed {
            managed.shutdown(name).await;
        }
    }

    /// Send `message` on the transport named `name`.
    pub async fn send(&self, name: &str, message: &JsonRpcMessage) -> Result<(), McpError> {
        let transport = self
            .get(name)
            .ok_or_else(|| McpError::TransportNotFound(name.to_string()))?;
        transport.send(message).await?;
        Ok(())
    }

    /// Send `message` on every transport. Failures are logged and skipped.
    ///
    /// Returns how many transports accepted the message.
    pub async fn broadcast(&self, message: &JsonRpcMessage) -> usize {
        let targets: Vec<(String, Arc<dyn McpTransport>)> = self
            .transports
            .lock()
            .iter()
            .map(|(name, m)| (name.clone(), Arc::clone(&m.transport)))
            .collect();

        let mut delivered = 0;
        for (name, transport) in targets {
            match transport.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(transport = %name, error = %e, "broadcast send failed");
                }
            }
        }
        delivered
    }

    /// Remove every transport, one at a time.
    pub async fn close_all(&self) {
        for name in self.names() {
            self.remove_transport(&name).await;
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTransport>> {
        self.transports
            .lock()
            .get(name)
            .map(|m| Arc::clone(&m.transport))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transports.lock().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transports.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.transports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcNotification, RequestId};
    use crate::transport::{HandlerRegistry, StdioTransport, TransportError, ANY_MESSAGE};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// A transport whose `send` always fails.
    #[derive(Default)]
    struct BrokenTransport {
        connected: AtomicBool,
        sends: AtomicUsize,
        handlers: HandlerRegistry,
    }

    #[async_trait]
    impl McpTransport for BrokenTransport {
        fn kind(&self) -> &'static str {
            "broken"
        }
        async fn connect(&self) -> Result<(), TransportError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        async fn send(&self, _message: &JsonRpcMessage) -> Result<(), TransportError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Connection("peer closed".into()))
        }
        fn receive_stream(&self) -> Result<MessageStream, TransportError> {
            Ok(futures_util::stream::pending().boxed())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn handlers(&self) -> &HandlerRegistry {
            &self.handlers
        }
    }

    /// A transport whose `connect` always fails.
    #[derive(Default)]
    struct UnreachableTransport {
        handlers: HandlerRegistry,
    }

    #[async_trait]
    impl McpTransport for UnreachableTransport {
        fn kind(&self) -> &'static str {
            "unreachable"
        }
        async fn connect(&self) -> Result<(), TransportError> {
            Err(TransportError::Connection("refused".into()))
        }
        async fn disconnect(&self) {}
        async fn send(&self, _message: &JsonRpcMessage) -> Result<(), TransportError> {
            Err(TransportError::NotConnected)
        }
        fn receive_stream(&self) -> Result<MessageStream, TransportError> {
            Err(TransportError::NotConnected)
        }
        fn is_connected(&self) -> bool {
            false
        }
        fn handlers(&self) -> &HandlerRegistry {
            &self.handlers
        }
    }

    fn stdio_pair() -> (Arc<StdioTransport>, DuplexStream) {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(ours);
        (Arc::new(StdioTransport::from_streams(r, w)), theirs)
    }

    fn note(method: &str) -> JsonRpcMessage {
        JsonRpcNotification::new(method, None).into()
    }

    #[tokio::test]
    async fn broadcast_survives_partial_failure() {
        let manager = TransportManager::new();
        let (good, peer) = stdio_pair();
        let broken = Arc::new(BrokenTransport::default());

        manager.add_transport("good", good).await.unwrap();
        manager.add_transport("broken", broken.clone()).await.unwrap();

        let delivered = manager.broadcast(&note("notifications/tools/list_changed")).await;
        assert_eq!(delivered, 1);
        assert_eq!(broken.sends.load(Ordering::SeqCst), 1);

        let mut lines = BufReader::new(peer).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains("notifications/tools/list_changed"));

        manager.close_all().await;
        assert!(manager.is_empty());
        assert!(!broken.is_connected());
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let manager = TransportManager::new();
        manager
            .add_transport("a", Arc::new(BrokenTransport::default()))
            .await
            .unwrap();
        let err = manager
            .add_transport("a", Arc::new(BrokenTransport::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::DuplicateTransport(name) if name == "a"));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn failed_connect_is_not_registered() {
        let manager = TransportManager::new();
        let err = manager
            .add_transport("down", Arc::new(UnreachableTransport::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport(TransportError::Connection(_))));
        assert!(!manager.contains("down"));
    }

    #[tokio::test]
    async fn send_to_unknown_name_fails() {
        let manager = TransportManager::new();
        let err = manager.send("nope", &note("x")).await.unwrap_err();
        assert!(matches!(err, McpError::TransportNotFound(name) if name == "nope"));

        // Removing an unknown name is a no-op.
        manager.remove_transport("nope").await;
    }

    #[tokio::test]
    async fn inbound_messages_reach_handlers_in_order() {
        let manager = TransportManager::new();
        let (transport, mut peer) = stdio_pair();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let tx_any = tx.clone();
        transport.register_handler(
            "notifications/message",
            Arc::new(move |m: JsonRpcMessage| {
                let _ = tx.send(m.method().unwrap_or_default().to_string());
            }),
        );
        transport.register_handler(
            ANY_MESSAGE,
            Arc::new(move |m: JsonRpcMessage| {
                let label = match m.id() {
                    Some(RequestId::Number(n)) => format!("response:{n}"),
                    _ => "other".to_string(),
                };
                let _ = tx_any.send(label);
            }),
        );

        manager.add_transport("local", transport).await.unwrap();

        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n")
            .await
            .unwrap();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\n")
            .await
            .unwrap();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/other\"}\n")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "notifications/message");
        assert_eq!(rx.recv().await.unwrap(), "response:7");
        assert_eq!(rx.recv().await.unwrap(), "other");

        manager.remove_transport("local").await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_receive_task() {
        let manager = TransportManager::new();
        let (transport, mut peer) = stdio_pair();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        transport.register_handler(
            ANY_MESSAGE,
            Arc::new(move |m: JsonRpcMessage| {
                let method = m.method().unwrap_or_default().to_string();
                if method == "notifications/boom" {
                    panic!("handler blew up");
                }
                let _ = tx.send(method);
            }),
        );
        manager.add_transport("local", transport).await.unwrap();

        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/boom\"}\n")
            .await
            .unwrap();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/after\"}\n")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "notifications/after");
        manager.close_all().await;
    }

    #[tokio::test]
    async fn names_are_sorted() {
        let manager = TransportManager::new();
        for name in ["zeta", "alpha", "mid"] {
            manager
                .add_transport(name, Arc::new(BrokenTransport::default()))
                .await
                .unwrap();
        }
        assert_eq!(manager.names(), vec!["alpha", "mid", "zeta"]);
        manager.close_all().await;
    }
}
