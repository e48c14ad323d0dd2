//! MCP configuration types, re-exported from `tause-domain`.
//!
//! The canonical definitions live in `tause_domain::config` so the CLI's
//! config loader can include them without depending on the transports.

pub use tause_domain::config::{
    ClientConfig, McpConfig, McpServerConfig, McpTransportKind, ProtocolVersionFormat,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexports_are_the_domain_types() {
        let from_domain: tause_domain::config::McpServerConfig =
            McpServerConfig::stdio("fs", "npx", vec![]);
        assert_eq!(from_domain.transport, McpTransportKind::Stdio);
        let _: tause_domain::config::ClientConfig = ClientConfig::default();
    }
}
