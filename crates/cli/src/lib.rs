//! `tause-mcp-cli`: composition root for the `tause-mcp` binary.
//!
//! Loads configuration, builds clients through the
//! [`McpClientFactory`](tause_mcp_client::McpClientFactory), and runs the
//! inspection subcommands in [`cli`].

pub mod cli;
