//! URL obfuscation configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObfuscationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Host used in obfuscated links instead of `serve.address`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            public_host: None,
        }
    }
}
