//! Integration test: boots an in-process WebSocket MCP server, connects a
//! real [`McpClient`] through the factory, and walks a full session:
//! - `initialize` / `notifications/initialized` handshake
//! - `tools/call` with progress notifications routed by token
//! - a server-initiated request answered by a registered handler
//! - a server-initiated request nobody handles (method-not-found)
//! - resource subscription gated on the advertised capability
//! - both wire shapes of `protocolVersion`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use tause_mcp_client::protocol::codes;
use tause_mcp_client::types::{ProgressParams, ResourceUpdatedParams};
use tause_mcp_client::{
    ClientConfig, JsonRpcError, McpClientFactory, McpServerConfig, McpTransport, McpTransportKind,
    ProtocolVersionFormat, SessionState,
};

// ── Mini MCP server ─────────────────────────────────────────────────────

/// Accepts one connection and answers like a small MCP server. Every
/// response the server receives from the client (to its own requests) is
/// forwarded on the returned channel.
async fn start_server() -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (replies_tx, replies_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let msg: Value = serde_json::from_str(&text).unwrap();
            let method = msg.get("method").and_then(Value::as_str).map(str::to_string);
            let id = msg.get("id").cloned();

            let mut out: Vec<Value> = Vec::new();
            match (method.as_deref(), id) {
                // Replies to our own requests.
                (None, Some(_)) => {
                    let _ = replies_tx.send(msg.clone());
                }
                (Some("initialize"), Some(id)) => out.push(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {}, "resources": {"subscribe": true}},
                        "serverInfo": {"name": "ws-demo", "version": "2.0"},
                        // Echo what the client sent so tests can check its shape.
                        "instructions": format!("protocolVersion={}", msg["params"]["protocolVersion"])
                    }
                })),
                (Some("notifications/initialized"), None) => {
                    // Ask the client something once the session is live.
                    out.push(json!({"jsonrpc": "2.0", "id": 100, "method": "roots/list"}));
                    out.push(json!({"jsonrpc": "2.0", "id": 101, "method": "elicitation/create"}));
                }
                (Some("tools/call"), Some(id)) => {
                    let token = msg["params"]["_meta"]["progressToken"].clone();
                    for step in [1.0, 2.0] {
                        out.push(json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/progress",
                            "params": {"progressToken": token, "progress": step, "total": 2.0}
                        }));
                    }
                    let arg = msg["params"]["arguments"]["text"].as_str().unwrap_or_default().to_string();
                    out.push(json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {"content": [{"type": "text", "text": arg.to_uppercase()}]}
                    }));
                }
                (Some("resources/subscribe"), Some(id)) => {
                    out.push(json!({"jsonrpc": "2.0", "id": id, "result": {}}));
                    out.push(json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/resources/updated",
                        "params": {"uri": msg["params"]["uri"]}
                    }));
                }
                (Some(other), Some(id)) => out.push(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("Method not found: {other}")}
                })),
                _ => {}
            }

            for frame in out {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
        }
    });

    (format!("ws://{addr}/mcp"), replies_rx)
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_session_over_websocket() {
    let (url, mut replies) = start_server().await;

    let factory = McpClientFactory::new(ClientConfig {
        name: "ws-test".into(),
        protocol_version_format: ProtocolVersionFormat::String,
        ..ClientConfig::default()
    });
    let mut server = McpServerConfig::remote("demo", McpTransportKind::WebSocket, url);
    // Register handlers before the handshake so early server requests are seen.
    server.auto_initialize = false;

    let client = factory.connect(&server).await.unwrap();
    assert_eq!(client.state(), SessionState::Connected);
    client.on_request("roots/list", |_params| async {
        Ok::<_, JsonRpcError>(json!({"roots": [{"uri": "file:///workspace", "name": "workspace"}]}))
    });
    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    client.on_resource_updated(move |update: ResourceUpdatedParams| {
        let _ = updates_tx.send(update.uri);
    });

    let init = client.initialize().await.unwrap();
    assert_eq!(init.server_info.name, "ws-demo");
    assert_eq!(init.instructions.as_deref(), Some(r#"protocolVersion="2025-03-26""#));
    assert_eq!(client.state(), SessionState::Initialized);

    // Server-initiated requests: one handled, one unknown.
    let mut got = Vec::new();
    for _ in 0..2 {
        got.push(tokio::time::timeout(Duration::from_secs(5), replies.recv()).await.unwrap().unwrap());
    }
    got.sort_by_key(|r| r["id"].as_i64());
    assert_eq!(got[0]["id"], 100);
    assert_eq!(got[0]["result"]["roots"][0]["name"], "workspace");
    assert_eq!(got[1]["id"], 101);
    assert_eq!(got[1]["error"]["code"], codes::METHOD_NOT_FOUND);

    // Progress is routed to the per-call handler.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let result = client
        .call_tool_with_progress(
            "shout",
            json!({"text": "hello"}),
            Arc::new(move |p: ProgressParams| {
                let _ = progress_tx.send(p.progress);
            }),
        )
        .await
        .unwrap();
    assert_eq!(result.text(), "HELLO");
    assert!(!result.is_error);
    assert_eq!(progress_rx.recv().await, Some(1.0));
    assert_eq!(progress_rx.recv().await, Some(2.0));

    // Subscription is allowed because the server declared `resources.subscribe`.
    client.subscribe_resource("memory://notes/1").await.unwrap();
    let uri = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uri, "memory://notes/1");

    // Prompts were never declared: rejected without a round-trip.
    assert!(client.list_prompts().await.is_err());

    // Unknown methods come back as RPC errors.
    let err = client.send_request("no/such", None, None).await.unwrap_err();
    assert_eq!(err.rpc_code(), Some(codes::METHOD_NOT_FOUND));

    client.disconnect().await;
    assert_eq!(client.state(), SessionState::Closed);
    assert!(!client.transport().is_connected());
}

#[tokio::test]
async fn request_handler_errors_become_error_responses() {
    let (url, mut replies) = start_server().await;
    let factory = McpClientFactory::default();
    let mut server = McpServerConfig::remote("demo", McpTransportKind::WebSocket, url);
    server.auto_initialize = false;

    let client = factory.connect(&server).await.unwrap();
    client.on_request("roots/list", |_params| async {
        Err::<Value, _>(JsonRpcError::invalid_params("no roots configured"))
    });
    let init = client.initialize().await.unwrap();
    assert_eq!(
        init.instructions.as_deref(),
        Some(r#"protocolVersion={"version":"2025-03-26"}"#)
    );

    let mut got = Vec::new();
    for _ in 0..2 {
        got.push(tokio::time::timeout(Duration::from_secs(5), replies.recv()).await.unwrap().unwrap());
    }
    let roots = got.iter().find(|r| r["id"] == 100).unwrap();
    assert_eq!(roots["error"]["code"], codes::INVALID_PARAMS);
    assert_eq!(roots["error"]["message"], "no roots configured");

    client.disconnect().await;
}
