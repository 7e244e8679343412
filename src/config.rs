use serde::{Deserialize, Serialize};

/// Agent-wide tunables. Loadable from TOML or JSON; every field has a
/// sensible default so a bare `{}` (or an empty file) produces a working
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_identifier")]
    pub identifier: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_connections_per_site")]
    pub max_connections_per_site: usize,

    #[serde(default = "default_follow_redirect")]
    pub follow_redirect: bool,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    #[serde(default = "default_preferred_transfer_encodings")]
    pub preferred_transfer_encodings: Vec<String>,

    #[serde(default = "default_preferred_connection")]
    pub preferred_connection: String,

    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            identifier: default_identifier(),
            max_connections: default_max_connections(),
            max_connections_per_site: default_max_connections_per_site(),
            follow_redirect: default_follow_redirect(),
            max_redirects: default_max_redirects(),
            preferred_transfer_encodings: default_preferred_transfer_encodings(),
            preferred_connection: default_preferred_connection(),
            connect_timeout_ms: None,
            request_timeout_ms: None,
            proxy: None,
            tls: TlsConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

fn default_identifier() -> String {
    format!("pendrix/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_connections() -> usize {
    30
}

fn default_max_connections_per_site() -> usize {
    2
}

fn default_follow_redirect() -> bool {
    true
}

fn default_max_redirects() -> u32 {
    5
}

fn default_preferred_transfer_encodings() -> Vec<String> {
    vec!["gzip".to_string(), "deflate".to_string()]
}

fn default_preferred_connection() -> String {
    "keep-alive".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,

    #[serde(default = "default_socks_version")]
    pub socks_version: SocksVersionConfig,

    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocksVersionConfig {
    V4,
    V4a,
}

fn default_socks_version() -> SocksVersionConfig {
    SocksVersionConfig::V4a
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_verify_certificates")]
    pub verify_certificates: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            verify_certificates: default_verify_certificates(),
        }
    }
}

fn default_verify_certificates() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg = AgentConfig::from_toml("").unwrap();
        assert_eq!(cfg.max_connections, 30);
        assert!(cfg.follow_redirect);
    }

    #[test]
    fn toml_overrides_specific_fields() {
        let cfg = AgentConfig::from_toml("max_connections = 4\nfollow_redirect = false\n").unwrap();
        assert_eq!(cfg.max_connections, 4);
        assert!(!cfg.follow_redirect);
        assert_eq!(cfg.max_connections_per_site, 2);
    }

    #[test]
    fn parses_proxy_section() {
        let cfg = AgentConfig::from_toml(
            "[proxy]\nhost = \"127.0.0.1\"\nport = 1080\nsocks_version = \"v4a\"\n",
        )
        .unwrap();
        let proxy = cfg.proxy.unwrap();
        assert_eq!(proxy.host, "127.0.0.1");
        assert_eq!(proxy.socks_version, SocksVersionConfig::V4a);
    }
}
