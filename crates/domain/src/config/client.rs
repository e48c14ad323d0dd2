use serde::{Deserialize, Serialize};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MCP client identity & defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity and defaults shared by every MCP client the process builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name reported as `clientInfo.name` during `initialize`.
    #[serde(default = "d_name")]
    pub name: String,

    /// Version reported as `clientInfo.version`.
    #[serde(default = "d_version")]
    pub version: String,

    /// Protocol version requested during `initialize`.
    #[serde(default = "d_protocol_version")]
    pub protocol_version: String,

    /// Wire shape of `protocolVersion` in the `initialize` request.
    #[serde(default)]
    pub protocol_version_format: ProtocolVersionFormat,

    /// Default deadline for a single request/response round-trip.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: d_name(),
            version: d_version(),
            protocol_version: d_protocol_version(),
            protocol_version_format: ProtocolVersionFormat::default(),
            request_timeout_ms: d_request_timeout_ms(),
        }
    }
}

/// How `protocolVersion` is encoded when the client sends `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersionFormat {
    /// `{"version": "2025-03-26"}`
    #[default]
    Object,
    /// `"2025-03-26"`, for servers that only accept the bare string.
    String,
}

fn d_name() -> String {
    "tause-mcp".into()
}

fn d_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn d_protocol_version() -> String {
    "2025-03-26".into()
}

fn d_request_timeout_ms() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.name, "tause-mcp");
        assert_eq!(cfg.protocol_version, "2025-03-26");
        assert_eq!(cfg.protocol_version_format, ProtocolVersionFormat::Object);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_override() {
        let cfg: ClientConfig = toml::from_str("request_timeout_ms = 250").unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.name, "tause-mcp");
    }

    #[test]
    fn string_protocol_version_format() {
        let cfg: ClientConfig = toml::from_str(r#"protocol_version_format = "string""#).unwrap();
        assert_eq!(cfg.protocol_version_format, ProtocolVersionFormat::String);
    }
}
