pub mod config;
pub mod inspect;
pub mod tail;

use clap::{Parser, Subcommand};

use tause_domain::config::{Config, McpServerConfig};

/// tause-mcp: inspect and exercise MCP servers from the command line.
#[derive(Debug, Parser)]
#[command(name = "tause-mcp", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the MCP servers defined in the config file.
    Servers,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Connect, initialize and ping a server; print what it reports.
    Probe {
        /// Server id from the config file.
        server: String,
    },
    /// List the tools a server exposes.
    Tools {
        server: String,
        /// Print the raw tool definitions as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Call a tool and print its result.
    Call {
        server: String,
        /// Tool name.
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Print the full result as JSON instead of its text content.
        #[arg(long)]
        json: bool,
        /// Print progress notifications to stderr while the call runs.
        #[arg(long)]
        progress: bool,
    },
    /// List a server's resources.
    Resources {
        server: String,
        /// List resource templates instead of concrete resources.
        #[arg(long)]
        templates: bool,
    },
    /// Read a resource by URI.
    Read { server: String, uri: String },
    /// List a server's prompts.
    Prompts { server: String },
    /// Open raw transports and print every inbound message until Ctrl-C.
    Tail {
        /// Server ids to watch (all configured servers when empty).
        servers: Vec<String>,
    },
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TAUSE_MCP_CONFIG`
/// (or `tause-mcp.toml` by default). Returns the parsed [`Config`] and the
/// path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path =
        std::env::var("TAUSE_MCP_CONFIG").unwrap_or_else(|_| "tause-mcp.toml".into());
    let config = load_config_from(&config_path)?;
    Ok((config, config_path))
}

/// Load `path`, or the defaults when it does not exist.
pub fn load_config_from(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))
}

/// Look up a server by id, listing the known ids on a miss.
pub fn find_server<'a>(config: &'a Config, id: &str) -> anyhow::Result<&'a McpServerConfig> {
    config.mcp.server(id).ok_or_else(|| {
        let known: Vec<&str> = config.mcp.servers.iter().map(|s| s.id.as_str()).collect();
        if known.is_empty() {
            anyhow::anyhow!("unknown server '{id}' (no servers configured)")
        } else {
            anyhow::anyhow!("unknown server '{id}' (configured: {})", known.join(", "))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config_from("/definitely/not/here/tause-mcp.toml").unwrap();
        assert!(config.mcp.servers.is_empty());
        assert_eq!(config.client.name, "tause-mcp");
    }

    #[test]
    fn malformed_file_names_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client\nname = ").unwrap();
        let path = file.path().to_string_lossy().to_string();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains(&path));
    }

    #[test]
    fn find_server_reports_known_ids() {
        let config: Config = toml::from_str(
            r#"
            [[mcp.servers]]
            id = "fs"
            command = "npx"
            "#,
        )
        .unwrap();
        assert!(find_server(&config, "fs").is_ok());
        let err = find_server(&config, "nope").unwrap_err();
        assert!(err.to_string().contains("configured: fs"));
    }

    #[test]
    fn cli_parses_call() {
        let cli = Cli::parse_from(["tause-mcp", "call", "fs", "read_file", "--args", r#"{"path":"/tmp"}"#, "--json"]);
        match cli.command {
            Command::Call { server, tool, args, json, progress } => {
                assert_eq!(server, "fs");
                assert_eq!(tool, "read_file");
                assert!(args.contains("/tmp"));
                assert!(json);
                assert!(!progress);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
