use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tause_domain::config::{LogFormat, ObservabilityConfig};
use tause_mcp_cli::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("tause-mcp {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (config, config_path) = cli::load_config()?;
    init_cli_tracing(&config.observability);
    tracing::debug!(path = %config_path, servers = config.mcp.servers.len(), "config loaded");

    match cli.command {
        Command::Servers => {
            cli::config::servers(&config);
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => cli::config::show(&config),
        Command::Probe { server } => cli::inspect::probe(&config, &server).await,
        Command::Tools { server, json } => cli::inspect::tools(&config, &server, json).await,
        Command::Call {
            server,
            tool,
            args,
            json,
            progress,
        } => cli::inspect::call(&config, &server, &tool, &args, json, progress).await,
        Command::Resources { server, templates } => {
            cli::inspect::resources(&config, &server, templates).await
        }
        Command::Read { server, uri } => cli::inspect::read(&config, &server, &uri).await,
        Command::Prompts { server } => cli::inspect::prompts(&config, &server).await,
        Command::Tail { servers } => cli::tail::run(&config, &servers)
            .await
            .context("tail"),
        Command::Version => Ok(()),
    }
}

/// Initialize tracing for CLI commands.
///
/// Output goes to stderr so stdout carries only command output. `RUST_LOG`
/// overrides the configured filter.
fn init_cli_tracing(obs: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&obs.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match obs.log_format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}
