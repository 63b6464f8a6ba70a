//! Listener and deployment secret configuration.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServeConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deployment secret, base64 at rest. Generated on first run.
    #[serde(default)]
    pub secure_random: SecureRandom,
    /// Directory served under `/static/`; `null` disables static assets
    #[serde(default = "default_static_dir")]
    pub static_dir: Option<String>,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> Option<String> {
    Some("./static".to_string())
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            secure_random: SecureRandom::default(),
            static_dir: default_static_dir(),
        }
    }
}

/// Secret bytes stored as standard base64 text.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecureRandom(Vec<u8>);

impl SecureRandom {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for SecureRandom {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// Keep the secret out of logs
impl fmt::Debug for SecureRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureRandom({} bytes)", self.0.len())
    }
}

impl Serialize for SecureRandom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for SecureRandom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }
        BASE64
            .decode(text)
            .map(Self)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 secure_random: {e}")))
    }
}
