//! Factory that turns configuration into ready-to-use clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tause_domain::config::{ClientConfig, McpServerConfig, McpTransportKind};

use crate::client::{ClientOptions, McpClient};
use crate::error::McpError;
use crate::transport::{McpTransport, SseTransport, StdioTransport, WebSocketTransport};
use crate::types::{ClientCapabilities, Implementation};

/// Builds transports and clients from config.
#[derive(Debug, Clone)]
pub struct McpClientFactory {
    config: ClientConfig,
    capabilities: ClientCapabilities,
}

impl McpClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            capabilities: ClientCapabilities::new(),
        }
    }

    /// Capabilities declared by every client this factory builds.
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// This client's identity, as sent in `initialize`.
    pub fn implementation(&self) -> Implementation {
        Implementation::new(&self.config.name, &self.config.version)
    }

    /// Construct (but do not connect) the transport described by `server`.
    pub fn transport(&self, server: &McpServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        server.validate()?;
        let url = server.url.clone().unwrap_or_default();

        let transport: Arc<dyn McpTransport> = match server.transport {
            McpTransportKind::Stdio => Arc::new(StdioTransport::from_config(server)),
            McpTransportKind::WebSocket => {
                let mut t = WebSocketTransport::new(url).with_headers(&server.headers);
                if let Some(tenant) = &server.tenant_id {
                    t = t.with_tenant(tenant.clone());
                }
                Arc::new(t)
            }
            McpTransportKind::Sse => {
                let mut t = SseTransport::new(url)?.with_headers(&server.headers);
                if let Some(tenant) = &server.tenant_id {
                    t = t.with_tenant(tenant.clone());
                }
                Arc::new(t)
            }
        };
        Ok(transport)
    }

    /// Wire `transport` into a new, unconnected client.
    pub fn client(&self, transport: Arc<dyn McpTransport>, request_timeout: Option<Duration>) -> McpClient {
        let mut options = ClientOptions::from(&self.config);
        options.capabilities = self.capabilities.clone();
        if let Some(timeout) = request_timeout {
            options.request_timeout = timeout;
        }
        McpClient::with_options(transport, self.implementation(), options)
    }

    /// Build an unconnected client for `server`.
    pub fn build(&self, server: &McpServerConfig) -> Result<McpClient, McpError> {
        let transport = self.transport(server)?;
        // 0 falls back to the client-wide default.
        let timeout = server
            .request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        Ok(self.client(transport, timeout))
    }

    /// Build, connect and (when `auto_initialize` is set) initialize a client.
    pub async fn connect(&self, server: &McpServerConfig) -> Result<McpClient, McpError> {
        let client = self.build(server)?;
        tracing::info!(
            server_id = %server.id,
            transport = %server.transport,
            "connecting to MCP server"
        );
        client.connect().await?;
        if server.auto_initialize {
            if let Err(e) = client.initialize().await {
                client.disconnect().await;
                return Err(e);
            }
        }
        Ok(client)
    }

    /// Connect and initialize a client that spawns `command`.
    pub async fn stdio(&self, command: &str, args: Vec<String>) -> Result<McpClient, McpError> {
        self.connect(&McpServerConfig::stdio(command, command, args)).await
    }

    /// Connect and initialize a WebSocket client.
    pub async fn websocket(&self, url: &str, tenant_id: Option<&str>) -> Result<McpClient, McpError> {
        let mut server = McpServerConfig::remote(url, McpTransportKind::WebSocket, url);
        server.tenant_id = tenant_id.map(str::to_string);
        self.connect(&server).await
    }

    /// Connect and initialize an SSE client.
    pub async fn sse(
        &self,
        url: &str,
        tenant_id: Option<&str>,
        headers: HashMap<String, String>,
    ) -> Result<McpClient, McpError> {
        let mut server = McpServerConfig::remote(url, McpTransportKind::Sse, url);
        server.tenant_id = tenant_id.map(str::to_string);
        server.headers = headers;
        self.connect(&server).await
    }
}

impl Default for McpClientFactory {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionState;

    #[test]
    fn implementation_comes_from_config() {
        let config = ClientConfig {
            name: "inspector".into(),
            version: "9.9.9".into(),
            ..ClientConfig::default()
        };
        let factory = McpClientFactory::new(config);
        assert_eq!(factory.implementation(), Implementation::new("inspector", "9.9.9"));
    }

    #[test]
    fn transport_kind_follows_config() {
        let factory = McpClientFactory::default();

        let stdio = McpServerConfig::stdio("fs", "npx", vec!["server".into()]);
        assert_eq!(factory.transport(&stdio).unwrap().kind(), "stdio");

        let ws = McpServerConfig::remote("ws", McpTransportKind::WebSocket, "ws://localhost:9000/mcp");
        assert_eq!(factory.transport(&ws).unwrap().kind(), "websocket");

        let sse = McpServerConfig::remote("sse", McpTransportKind::Sse, "http://localhost:8000/events");
        assert_eq!(factory.transport(&sse).unwrap().kind(), "sse");
    }

    #[test]
    fn invalid_server_config_is_rejected() {
        let factory = McpClientFactory::default();
        let mut server = McpServerConfig::remote("ws", McpTransportKind::WebSocket, "");
        server.url = None;
        assert!(matches!(factory.transport(&server), Err(McpError::Config(_))));

        let stdio = McpServerConfig::stdio("fs", "", vec![]);
        assert!(matches!(factory.build(&stdio), Err(McpError::Config(_))));
    }

    #[test]
    fn built_client_starts_new() {
        let factory = McpClientFactory::default();
        let client = factory
            .build(&McpServerConfig::stdio("fs", "npx", vec![]))
            .unwrap();
        assert_eq!(client.state(), SessionState::New);
        assert_eq!(client.client_info().name, "tause-mcp");
    }

    #[tokio::test]
    async fn connect_failure_propagates() {
        let factory = McpClientFactory::default();
        let server = McpServerConfig::stdio("ghost", "/definitely/not/a/real/binary", vec![]);
        let err = factory.connect(&server).await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }
}
