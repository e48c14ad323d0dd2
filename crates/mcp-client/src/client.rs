//! MCP client: a stateful JSON-RPC session on top of one transport.
//!
//! The client owns the transport's receive stream through a single dispatch
//! task. Outbound requests park a oneshot sender in the pending table keyed
//! by request id; the dispatch task (response), the timeout path, or
//! disconnect removes that entry under the lock, so each request is settled
//! exactly once.
//!
//! Entries are only inserted while the state lock confirms the session is
//! open. Teardown flips the state to `Closed` first and drains the table
//! last, so nothing can slip in after the drain.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tause_domain::config::{ClientConfig, ProtocolVersionFormat};

use crate::error::McpError;
use crate::protocol::{
    methods, JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
use crate::transport::{McpTransport, MessageStream, ANY_MESSAGE};
use crate::types::{
    CallToolParams, CallToolResult, CancelledParams, ClientCapabilities, CreateMessageParams,
    CreateMessageResult, GetPromptResult, Implementation, InitializeParams, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    LoggingLevel, LoggingMessageParams, ProgressParams, ProgressToken, Prompt, ProtocolVersion,
    ReadResourceResult, RequestMeta, Resource, ResourceTemplate, ResourceUpdatedParams,
    ServerCapabilities, SetLevelParams, Tool,
};

/// Handler for a server-initiated request. The returned value becomes the
/// response `result`; an error becomes the response `error`.
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, JsonRpcError>> + Send + Sync>;

/// Handler for an inbound notification.
pub type NotificationHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Handler for `notifications/progress` carrying a particular token.
pub type ProgressHandler = Arc<dyn Fn(ProgressParams) + Send + Sync>;

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connected,
    Initializing,
    Initialized,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Connected => "connected",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Construction-time settings of a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub capabilities: ClientCapabilities,
    pub protocol_version: ProtocolVersion,
    /// Default deadline for [`McpClient::send_request`] when none is given.
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            capabilities: ClientCapabilities::new(),
            protocol_version: ProtocolVersion::from(config),
            request_timeout: config.request_timeout(),
        }
    }
}

impl From<&ClientConfig> for ProtocolVersion {
    fn from(config: &ClientConfig) -> Self {
        match config.protocol_version_format {
            ProtocolVersionFormat::Object => Self::wrapped(&config.protocol_version),
            ProtocolVersionFormat::String => Self::plain(&config.protocol_version),
        }
    }
}

/// What the server told us during `initialize`.
#[derive(Debug, Clone)]
pub struct ServerSession {
    pub server_info: Implementation,
    pub capabilities: ServerCapabilities,
    pub protocol_version: String,
    pub instructions: Option<String>,
}

struct DispatchTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single MCP session over one transport.
pub struct McpClient {
    inner: Arc<ClientInner>,
    dispatch: tokio::sync::Mutex<Option<DispatchTask>>,
}

struct ClientInner {
    transport: Arc<dyn McpTransport>,
    client_info: Implementation,
    options: ClientOptions,
    state: Mutex<SessionState>,
    session: RwLock<Option<ServerSession>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    progress_handlers: RwLock<HashMap<ProgressToken, ProgressHandler>>,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>, client_info: Implementation) -> Self {
        Self::with_options(transport, client_info, ClientOptions::default())
    }

    pub fn with_options(
        transport: Arc<dyn McpTransport>,
        client_info: Implementation,
        options: ClientOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                client_info,
                options,
                state: Mutex::new(SessionState::New),
                session: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                request_handlers: RwLock::new(HashMap::new()),
                notification_handlers: RwLock::new(HashMap::new()),
                progress_handlers: RwLock::new(HashMap::new()),
            }),
            dispatch: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn client_info(&self) -> &Implementation {
        &self.inner.client_info
    }

    pub fn transport(&self) -> &Arc<dyn McpTransport> {
        &self.inner.transport
    }

    /// The server's identity and capabilities, once initialized.
    pub fn server(&self) -> Option<ServerSession> {
        self.inner.session.read().clone()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Connect the transport and start the inbound dispatch task.
    pub async fn connect(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::New => {}
            SessionState::Closed => {
                return Err(McpError::State("client is closed; create a new client to reconnect".into()))
            }
            other => return Err(McpError::State(format!("client is already {other}"))),
        }

        let transport = &self.inner.transport;
        transport.connect().await?;
        let stream = match transport.receive_stream() {
            Ok(stream) => stream,
            Err(e) => {
                transport.disconnect().await;
                return Err(e.into());
            }
        };

        *self.inner.state.lock() = SessionState::Connected;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).dispatch_loop(stream, cancel.clone()));
        *self.dispatch.lock().await = Some(DispatchTask { cancel, handle });

        tracing::info!(transport = transport.kind(), "MCP client connected");
        Ok(())
    }

    /// Close the session, stop the dispatch task, disconnect the transport,
    /// then cancel whatever requests are still outstanding. Safe to call
    /// more than once.
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), SessionState::Closed);

        if let Some(task) = self.dispatch.lock().await.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "MCP dispatch task ended abnormally");
            }
        }

        self.inner.transport.disconnect().await;

        let cancelled = self.inner.cancel_pending();
        if cancelled > 0 {
            tracing::debug!(count = cancelled, "cancelled pending MCP requests");
        }
        if previous != SessionState::Closed {
            tracing::info!(transport = self.inner.transport.kind(), "MCP client disconnected");
        }
    }

    /// Run the `initialize` handshake, then send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                SessionState::Connected => *state = SessionState::Initializing,
                SessionState::Initializing | SessionState::Initialized => {
                    return Err(McpError::State("initialize may only be called once per client".into()))
                }
                other => return Err(McpError::State(format!("cannot initialize a {other} client"))),
            }
        }

        match self.handshake().await {
            Ok(result) => Ok(result),
            Err(e) => {
                let mut state = self.inner.state.lock();
                if *state == SessionState::Initializing {
                    *state = SessionState::Connected;
                }
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult, McpError> {
        let inner = &self.inner;
        let params = InitializeParams {
            protocol_version: inner.options.protocol_version.clone(),
            capabilities: inner.options.capabilities.clone(),
            client_info: inner.client_info.clone(),
        };

        let value = inner
            .request(methods::INITIALIZE, Some(to_params(&params)?), None)
            .await?;
        let result: InitializeResult = decode(methods::INITIALIZE, value)?;

        if result.protocol_version != inner.options.protocol_version.as_str() {
            tracing::warn!(
                requested = %inner.options.protocol_version,
                negotiated = %result.protocol_version,
                "MCP server negotiated a different protocol version"
            );
        }

        *inner.session.write() = Some(ServerSession {
            server_info: result.server_info.clone(),
            capabilities: result.capabilities.clone(),
            protocol_version: result.protocol_version.clone(),
            instructions: result.instructions.clone(),
        });

        if let Err(e) = inner.notify(methods::INITIALIZED, None).await {
            inner.session.write().take();
            return Err(e);
        }
        *inner.state.lock() = SessionState::Initialized;

        tracing::info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP session initialized"
        );
        Ok(result)
    }

    // ── Raw RPC ─────────────────────────────────────────────────────

    /// Send a request and wait for its result. Requires an initialized
    /// session; earlier calls fail locally and never reach the wire.
    ///
    /// `timeout` falls back to the client's default. On expiry the pending
    /// entry is dropped, the server is told via `notifications/cancelled`,
    /// and any late response is discarded.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        self.ensure_initialized()?;
        self.inner.request(method, params, timeout).await
    }

    /// Send a notification. Nothing comes back.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.ensure_initialized()?;
        self.inner.notify(method, params).await
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<(), McpError> {
        self.send_request(methods::PING, None, None).await.map(|_| ())
    }

    // ── Tools ───────────────────────────────────────────────────────

    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        self.require_capability("tools")?;
        let result: ListToolsResult = self.call(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        self.require_capability("tools")?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
            meta: None,
        };
        self.call(methods::TOOLS_CALL, Some(to_params(&params)?)).await
    }

    /// Call a tool, routing its `notifications/progress` to `on_progress`
    /// until the call settles.
    pub async fn call_tool_with_progress(
        &self,
        name: &str,
        arguments: Value,
        on_progress: ProgressHandler,
    ) -> Result<CallToolResult, McpError> {
        self.require_capability("tools")?;
        let token = RequestId::random();
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
            meta: Some(RequestMeta {
                progress_token: token.clone(),
            }),
        };
        let params = to_params(&params)?;

        self.on_progress(token.clone(), on_progress);
        let _registered = ProgressRegistration {
            handlers: &self.inner.progress_handlers,
            token,
        };
        self.call(methods::TOOLS_CALL, Some(params)).await
    }

    // ── Resources ───────────────────────────────────────────────────

    pub async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        self.require_capability("resources")?;
        let result: ListResourcesResult = self.call(methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, McpError> {
        self.require_capability("resources")?;
        let result: ListResourceTemplatesResult =
            self.call(methods::RESOURCES_TEMPLATES_LIST, None).await?;
        Ok(result.resource_templates)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        self.require_capability("resources")?;
        self.call(methods::RESOURCES_READ, Some(serde_json::json!({ "uri": uri })))
            .await
    }

    /// Subscribe to `notifications/resources/updated` for `uri`.
    pub async fn subscribe_resource(&self, uri: &str) -> Result<(), McpError> {
        self.require_flag("resources", "subscribe")?;
        let _: Value = self
            .call(methods::RESOURCES_SUBSCRIBE, Some(serde_json::json!({ "uri": uri })))
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, uri: &str) -> Result<(), McpError> {
        self.require_flag("resources", "subscribe")?;
        let _: Value = self
            .call(methods::RESOURCES_UNSUBSCRIBE, Some(serde_json::json!({ "uri": uri })))
            .await?;
        Ok(())
    }

    // ── Prompts ─────────────────────────────────────────────────────

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, McpError> {
        self.require_capability("prompts")?;
        let result: ListPromptsResult = self.call(methods::PROMPTS_LIST, None).await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, McpError> {
        self.require_capability("prompts")?;
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.call(methods::PROMPTS_GET, Some(params)).await
    }

    // ── Sampling & logging ──────────────────────────────────────────

    pub async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult, McpError> {
        self.ensure_initialized()?;
        self.call(methods::SAMPLING_CREATE_MESSAGE, Some(to_params(&params)?))
            .await
    }

    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<(), McpError> {
        self.require_capability("logging")?;
        let _: Value = self
            .call(methods::LOGGING_SET_LEVEL, Some(to_params(&SetLevelParams { level })?))
            .await?;
        Ok(())
    }

    // ── Handler registration ────────────────────────────────────────

    /// Answer server-initiated requests for `method` (or [`ANY_MESSAGE`]).
    pub fn on_request<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |params| handler(params).boxed());
        self.inner
            .request_handlers
            .write()
            .insert(method.into(), handler);
    }

    /// Receive notifications for `method` (or [`ANY_MESSAGE`]).
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.inner
            .notification_handlers
            .write()
            .insert(method.into(), Arc::new(handler));
    }

    /// Receive progress notifications carrying `token`.
    pub fn on_progress(&self, token: ProgressToken, handler: ProgressHandler) {
        self.inner.progress_handlers.write().insert(token, handler);
    }

    pub fn remove_progress_handler(&self, token: &ProgressToken) -> bool {
        self.inner.progress_handlers.write().remove(token).is_some()
    }

    /// Receive `notifications/message` log records from the server.
    pub fn on_log_message<F>(&self, handler: F)
    where
        F: Fn(LoggingMessageParams) + Send + Sync + 'static,
    {
        self.on_typed_notification(methods::MESSAGE, handler);
    }

    /// Receive `notifications/resources/updated` for subscribed URIs.
    pub fn on_resource_updated<F>(&self, handler: F)
    where
        F: Fn(ResourceUpdatedParams) + Send + Sync + 'static,
    {
        self.on_typed_notification(methods::RESOURCES_UPDATED, handler);
    }

    fn on_typed_notification<T, F>(&self, method: &'static str, handler: F)
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_notification(method, move |params| {
            match serde_json::from_value::<T>(params.unwrap_or(Value::Null)) {
                Ok(typed) => handler(typed),
                Err(e) => tracing::warn!(method, error = %e, "malformed MCP notification, dropping"),
            }
        });
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, McpError> {
        let value = self.inner.request(method, params, None).await?;
        decode(method, value)
    }

    fn ensure_initialized(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Initialized => Ok(()),
            other => Err(McpError::State(format!(
                "client is {other}; call initialize() first"
            ))),
        }
    }

    fn require_capability(&self, feature: &str) -> Result<(), McpError> {
        self.ensure_initialized()?;
        let session = self.inner.session.read();
        match session.as_ref() {
            Some(s) if s.capabilities.supports(feature) => Ok(()),
            _ => Err(McpError::State(format!(
                "server did not declare the `{feature}` capability"
            ))),
        }
    }

    fn require_flag(&self, feature: &str, flag: &str) -> Result<(), McpError> {
        self.require_capability(feature)?;
        let session = self.inner.session.read();
        match session.as_ref() {
            Some(s) if s.capabilities.flag(feature, flag) => Ok(()),
            _ => Err(McpError::State(format!(
                "server does not support `{feature}.{flag}`"
            ))),
        }
    }
}

/// Unregisters a progress handler when its call settles or is dropped.
struct ProgressRegistration<'a> {
    handlers: &'a RwLock<HashMap<ProgressToken, ProgressHandler>>,
    token: ProgressToken,
}

impl Drop for ProgressRegistration<'_> {
    fn drop(&mut self) {
        self.handlers.write().remove(&self.token);
    }
}

/// Removes a pending entry if the awaiting future goes away early.
struct PendingEntry<'a> {
    pending: &'a Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    id: RequestId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("transport", &self.inner.transport.kind())
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request/response correlation and dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ClientInner {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let id = RequestId::random();
        let mut rx = self.register(id.clone())?;
        let _entry = PendingEntry {
            pending: &self.pending,
            id: id.clone(),
        };

        let request = JsonRpcRequest::new(id.clone(), method, params);
        self.transport.send(&request.into()).await?;
        tracing::debug!(%id, method, "MCP request sent");

        let timeout = timeout.unwrap_or(self.options.request_timeout);
        let response = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(McpError::Cancelled {
                    method: method.to_string(),
                })
            }
            Err(_) => {
                if self.pending.lock().remove(&id).is_some() {
                    tracing::warn!(%id, method, ?timeout, "MCP request timed out");
                    self.notify_cancelled(id, format!("request timed out after {timeout:?}"))
                        .await;
                    return Err(McpError::Timeout {
                        method: method.to_string(),
                        timeout,
                    });
                }
                // Settled concurrently: the sender was already taken.
                match rx.await {
                    Ok(response) => response,
                    Err(_) => {
                        return Err(McpError::Cancelled {
                            method: method.to_string(),
                        })
                    }
                }
            }
        };

        response.into_result().map_err(|error| McpError::Rpc {
            method: method.to_string(),
            error,
        })
    }

    /// Park a sender for `id`, provided the session is still open.
    fn register(&self, id: RequestId) -> Result<oneshot::Receiver<JsonRpcResponse>, McpError> {
        let state = self.state.lock();
        match *state {
            SessionState::Initializing | SessionState::Initialized => {}
            other => return Err(McpError::State(format!("client is {other}"))),
        }
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        Ok(rx)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport.send(&notification.into()).await?;
        tracing::debug!(method, "MCP notification sent");
        Ok(())
    }

    async fn notify_cancelled(&self, request_id: RequestId, reason: String) {
        let params = CancelledParams {
            request_id,
            reason: Some(reason),
        };
        let params = match serde_json::to_value(&params) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "failed to encode cancellation notice");
                return;
            }
        };
        if let Err(e) = self.notify(methods::CANCELLED, Some(params)).await {
            tracing::debug!(error = %e, "failed to send cancellation notice");
        }
    }

    /// Drop every pending sender so each awaiting caller sees `Cancelled`.
    fn cancel_pending(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        drained.len()
    }

    async fn dispatch_loop(self: Arc<Self>, mut stream: MessageStream, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(message) => self.dispatch(message),
                None => break,
            }
        }

        // The peer closed the stream on its own.
        *self.state.lock() = SessionState::Closed;
        let cancelled = self.cancel_pending();
        tracing::info!(
            transport = self.transport.kind(),
            cancelled,
            "MCP inbound stream ended, session closed"
        );
    }

    fn dispatch(self: &Arc<Self>, message: JsonRpcMessage) {
        match message {
            JsonRpcMessage::Response(response) => self.handle_response(response),
            JsonRpcMessage::Notification(notification) => self.handle_notification(notification),
            JsonRpcMessage::Request(request) => self.handle_request(request),
        }
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let sender = self.pending.lock().remove(&response.id);
        match sender {
            Some(tx) => {
                if tx.send(response).is_err() {
                    tracing::debug!("MCP caller went away before its response arrived");
                }
            }
            None => {
                tracing::warn!(id = %response.id, "MCP response for unknown request id, dropping");
            }
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        if method == methods::PROGRESS {
            let progress = match params.map(serde_json::from_value::<ProgressParams>) {
                Some(Ok(p)) => p,
                _ => {
                    tracing::warn!("malformed MCP progress notification, dropping");
                    return;
                }
            };
            let handler = self.progress_handlers.read().get(&progress.progress_token).cloned();
            if let Some(handler) = handler {
                let caught = std::panic::catch_unwind(AssertUnwindSafe(|| handler(progress)));
                if caught.is_err() {
                    tracing::error!("MCP progress handler panicked");
                }
            }
            return;
        }

        let handler = {
            let handlers = self.notification_handlers.read();
            handlers
                .get(&method)
                .or_else(|| handlers.get(ANY_MESSAGE))
                .cloned()
        };
        match handler {
            Some(handler) => {
                let caught = std::panic::catch_unwind(AssertUnwindSafe(|| handler(params)));
                if caught.is_err() {
                    tracing::error!(method = %method, "MCP notification handler panicked");
                }
            }
            None => {
                tracing::warn!(method = %method, "no handler for MCP notification, dropping");
            }
        }
    }

    fn handle_request(self: &Arc<Self>, request: JsonRpcRequest) {
        let JsonRpcRequest { id, method, params, .. } = request;

        let handler = {
            let handlers = self.request_handlers.read();
            handlers
                .get(&method)
                .or_else(|| handlers.get(ANY_MESSAGE))
                .cloned()
        };

        // Invoked here so handlers start in arrival order; only the
        // awaiting happens off the dispatch task.
        let reply: BoxFuture<'static, Result<Value, JsonRpcError>> = match handler {
            Some(handler) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler(params))) {
                    Ok(fut) => fut,
                    Err(_) => futures_util::future::ready(Err(JsonRpcError::internal(format!(
                        "handler for `{method}` panicked"
                    ))))
                    .boxed(),
                }
            }
            None if method == methods::PING => {
                futures_util::future::ready(Ok(Value::Object(Default::default()))).boxed()
            }
            None => {
                tracing::warn!(method = %method, "no handler for MCP request");
                futures_util::future::ready(Err(JsonRpcError::method_not_found(&method))).boxed()
            }
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(reply).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => Err(JsonRpcError::internal(format!("handler for `{method}` panicked"))),
            };
            let response = match outcome {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::failure(id, error),
            };
            if let Err(e) = inner.transport.send(&response.into()).await {
                tracing::warn!(method = %method, error = %e, "failed to answer MCP request");
            }
        });
    }
}

fn to_params<T: Serialize>(params: &T) -> Result<Value, McpError> {
    serde_json::to_value(params).map_err(|e| McpError::Protocol(format!("failed to encode params: {e}")))
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, McpError> {
    serde_json::from_value(value)
        .map_err(|e| McpError::Protocol(format!("invalid `{method}` result: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
