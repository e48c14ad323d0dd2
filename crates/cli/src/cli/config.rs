use tause_domain::config::{Config, ConfigSeverity, McpTransportKind};

/// Parse and validate the config, printing any issues.
///
/// Returns `false` when at least one error was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
    print!("{output}");
    Ok(())
}

/// Print one line per configured server.
pub fn servers(config: &Config) {
    if config.mcp.servers.is_empty() {
        println!("No MCP servers configured.");
        return;
    }
    for server in &config.mcp.servers {
        let target = match server.transport {
            McpTransportKind::Stdio => {
                let mut parts = vec![server.command.clone()];
                parts.extend(server.args.iter().cloned());
                parts.join(" ")
            }
            McpTransportKind::WebSocket | McpTransportKind::Sse => {
                server.url.clone().unwrap_or_default()
            }
        };
        let tenant = server
            .tenant_id
            .as_deref()
            .map(|t| format!("  (tenant {t})"))
            .unwrap_or_default();
        println!("{:<20} {:<10} {target}{tenant}", server.id, server.transport.to_string());
    }
}
