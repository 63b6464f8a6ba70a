//! Upstream proxy configuration.

use serde::{Deserialize, Serialize};

/// Intermediary HTTP proxy that outbound requests are routed through.
///
/// When enabled, TLS certificate verification is disabled for requests sent
/// through it so intercepting proxies can be chained in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_address")]
    pub address: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

fn default_proxy_address() -> String {
    "127.0.0.1".to_string()
}

fn default_proxy_port() -> u16 {
    8081
}

impl Default for UpstreamProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_proxy_address(),
            port: default_proxy_port(),
        }
    }
}

impl UpstreamProxyConfig {
    /// Proxy URL, or `None` when the upstream proxy is disabled.
    pub fn url(&self) -> Option<String> {
        self.enabled
            .then(|| format!("http://{}:{}", self.address.trim(), self.port))
    }
}
