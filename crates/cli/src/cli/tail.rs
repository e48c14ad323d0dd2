//! `tause-mcp tail`: raw traffic monitor built on the transport manager.
//!
//! Each watched server gets a bare transport (no client session). A raw
//! `initialize` request is sent so the server starts talking, and every
//! inbound frame is printed as one JSON line, prefixed with the server id.

use std::sync::Arc;

use tause_domain::config::{Config, McpServerConfig};
use tause_mcp_client::protocol::{methods, JsonRpcRequest};
use tause_mcp_client::transport::ANY_MESSAGE;
use tause_mcp_client::types::{ClientCapabilities, InitializeParams, ProtocolVersion};
use tause_mcp_client::{JsonRpcMessage, McpClientFactory, McpTransport, RequestId, TransportManager};

use super::find_server;

pub async fn run(config: &Config, server_ids: &[String]) -> anyhow::Result<()> {
    let servers: Vec<&McpServerConfig> = if server_ids.is_empty() {
        config.mcp.servers.iter().collect()
    } else {
        server_ids
            .iter()
            .map(|id| find_server(config, id))
            .collect::<anyhow::Result<_>>()?
    };
    if servers.is_empty() {
        anyhow::bail!("no MCP servers configured");
    }

    let factory = McpClientFactory::new(config.client.clone());
    let manager = TransportManager::new();

    for server in servers {
        let transport = match factory.transport(server) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("skipping '{}': {e}", server.id);
                continue;
            }
        };
        let label = server.id.clone();
        transport.register_handler(ANY_MESSAGE, Arc::new(move |message: JsonRpcMessage| {
            print_frame(&label, &message);
        }));

        if let Err(e) = manager.add_transport(server.id.clone(), transport).await {
            eprintln!("skipping '{}': {e}", server.id);
            continue;
        }
        if let Err(e) = handshake(&factory, &manager, &server.id).await {
            eprintln!("'{}': handshake failed: {e}", server.id);
        }
    }

    if manager.is_empty() {
        anyhow::bail!("no server could be reached");
    }
    eprintln!("watching {} (Ctrl-C to stop)", manager.names().join(", "));

    tokio::signal::ctrl_c().await?;
    manager.close_all().await;
    Ok(())
}

async fn handshake(
    factory: &McpClientFactory,
    manager: &TransportManager,
    name: &str,
) -> anyhow::Result<()> {
    let params = InitializeParams {
        protocol_version: ProtocolVersion::from(factory.config()),
        capabilities: ClientCapabilities::new(),
        client_info: factory.implementation(),
    };
    let request = JsonRpcRequest::new(
        RequestId::random(),
        methods::INITIALIZE,
        Some(serde_json::to_value(&params)?),
    );
    manager.send(name, &request.into()).await?;
    Ok(())
}

fn print_frame(server: &str, message: &JsonRpcMessage) {
    match serde_json::to_string(message) {
        Ok(json) => println!("{server}\t{json}"),
        Err(e) => tracing::warn!(server, error = %e, "failed to re-encode inbound frame"),
    }
}
