//! One-shot subcommands: connect, ask one thing, print, disconnect.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;

use tause_domain::config::{Config, McpServerConfig};
use tause_mcp_client::types::ProgressParams;
use tause_mcp_client::{McpClient, McpClientFactory};

use super::find_server;

/// Connect and initialize the named server, run `f`, then always disconnect.
async fn with_client<T, F, Fut>(config: &Config, server_id: &str, f: F) -> anyhow::Result<T>
where
    F: FnOnce(Arc<McpClient>) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let server = find_server(config, server_id)?;
    let client = connect(config, server).await?;
    let result = f(Arc::clone(&client)).await;
    client.disconnect().await;
    result
}

async fn connect(config: &Config, server: &McpServerConfig) -> anyhow::Result<Arc<McpClient>> {
    let factory = McpClientFactory::new(config.client.clone());
    // These commands need a live session regardless of `auto_initialize`.
    let server = McpServerConfig {
        auto_initialize: true,
        ..server.clone()
    };
    let client = factory
        .connect(&server)
        .await
        .with_context(|| format!("connecting to MCP server '{}'", server.id))?;
    Ok(Arc::new(client))
}

pub async fn probe(config: &Config, server_id: &str) -> anyhow::Result<()> {
    with_client(config, server_id, |client| async move {
        let started = std::time::Instant::now();
        client.ping().await.context("ping")?;
        let rtt = started.elapsed();

        let Some(session) = client.server() else {
            anyhow::bail!("server session missing after initialize");
        };
        println!("server:    {} {}", session.server_info.name, session.server_info.version);
        println!("protocol:  {}", session.protocol_version);
        let mut features: Vec<&str> = session.capabilities.0.keys().map(String::as_str).collect();
        features.sort_unstable();
        println!("features:  {}", if features.is_empty() { "-".to_string() } else { features.join(", ") });
        println!("ping:      {} ms", rtt.as_millis());
        if let Some(instructions) = session.instructions {
            println!("\n{instructions}");
        }
        Ok(())
    })
    .await
}

pub async fn tools(config: &Config, server_id: &str, json: bool) -> anyhow::Result<()> {
    with_client(config, server_id, |client| async move {
        let tools = client.list_tools().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&tools)?);
            return Ok(());
        }
        if tools.is_empty() {
            println!("No tools.");
        }
        for tool in tools {
            println!("{:<32} {}", tool.name, first_line(&tool.description));
        }
        Ok(())
    })
    .await
}

pub async fn call(
    config: &Config,
    server_id: &str,
    tool: &str,
    args: &str,
    json: bool,
    progress: bool,
) -> anyhow::Result<()> {
    let arguments: Value = serde_json::from_str(args).context("--args must be a JSON object")?;
    if !arguments.is_object() {
        anyhow::bail!("--args must be a JSON object");
    }

    let is_error = with_client(config, server_id, |client| async move {
        let result = if progress {
            let handler = Arc::new(|p: ProgressParams| {
                let total = p.total.map(|t| format!("/{t}")).unwrap_or_default();
                let message = p.message.map(|m| format!(" {m}")).unwrap_or_default();
                eprintln!("[progress] {}{total}{message}", p.progress);
            });
            client.call_tool_with_progress(tool, arguments, handler).await?
        } else {
            client.call_tool(tool, arguments).await?
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("{}", result.text());
        }
        Ok(result.is_error)
    })
    .await?;

    if is_error {
        anyhow::bail!("tool '{tool}' reported an error");
    }
    Ok(())
}

pub async fn resources(config: &Config, server_id: &str, templates: bool) -> anyhow::Result<()> {
    with_client(config, server_id, |client| async move {
        if templates {
            for t in client.list_resource_templates().await? {
                println!("{:<40} {}", t.uri_template, t.name);
            }
        } else {
            for r in client.list_resources().await? {
                let mime = r.mime_type.as_deref().unwrap_or("-");
                println!("{:<40} {:<24} {}", r.uri, mime, r.name);
            }
        }
        Ok(())
    })
    .await
}

pub async fn read(config: &Config, server_id: &str, uri: &str) -> anyhow::Result<()> {
    with_client(config, server_id, |client| async move {
        let result = client.read_resource(uri).await?;
        for contents in result.contents {
            match (contents.text, contents.blob) {
                (Some(text), _) => println!("{text}"),
                (None, Some(blob)) => println!("<{} bytes base64: {}>", blob.len(), contents.uri),
                (None, None) => println!("<empty: {}>", contents.uri),
            }
        }
        Ok(())
    })
    .await
}

pub async fn prompts(config: &Config, server_id: &str) -> anyhow::Result<()> {
    with_client(config, server_id, |client| async move {
        for prompt in client.list_prompts().await? {
            let args: Vec<String> = prompt
                .arguments
                .iter()
                .map(|a| if a.required { a.name.clone() } else { format!("[{}]", a.name) })
                .collect();
            println!(
                "{:<32} {:<32} {}",
                prompt.name,
                args.join(" "),
                first_line(prompt.description.as_deref().unwrap_or_default())
            );
        }
        Ok(())
    })
    .await
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}
