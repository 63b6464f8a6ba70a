//! Configuration types for the Frenzy proxy.
//!
//! The settings file is YAML and is loaded once at startup. The only mutation
//! ever applied to it is the first-run bootstrap that fills in the deployment
//! secret and writes the file back.

mod obfuscation;
mod rules;
mod serve;
mod upstream;

use std::net::Ipv6Addr;
use std::path::Path;

use anyhow::Context;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::rules::ServerContext;

pub use obfuscation::ObfuscationConfig;
pub use rules::{Rule, RuleModule};
pub use serve::{SecureRandom, ServeConfig};
pub use upstream::UpstreamProxyConfig;

/// Number of random bytes generated for the deployment secret.
pub const SECURE_RANDOM_LEN: usize = 128;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serve: ServeConfig,

    /// Optional intermediary proxy for outbound requests
    #[serde(default)]
    pub proxy: UpstreamProxyConfig,

    /// Ordered rule list. Order is the execution order.
    #[serde(rename = "rule", alias = "rules", default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub obfuscation: ObfuscationConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, anyhow::Error> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let path = path.as_ref();
        std::fs::write(path, self.to_yaml()?)
            .with_context(|| format!("Failed to write config file '{}'", path.display()))
    }

    /// Load the settings file, generating and persisting the deployment
    /// secret when it is missing.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?;

        if config.ensure_secure_random()? {
            config.save(path)?;
            info!(
                "Generated deployment secret and saved it to {}",
                path.display()
            );
        }
        Ok(config)
    }

    /// Fill in the deployment secret if it is absent. Returns true when a new
    /// secret was generated. An existing secret is never replaced.
    pub fn ensure_secure_random(&mut self) -> Result<bool, anyhow::Error> {
        if !self.serve.secure_random.is_empty() {
            return Ok(false);
        }

        let mut secret = vec![0u8; SECURE_RANDOM_LEN];
        OsRng
            .try_fill_bytes(&mut secret)
            .map_err(|e| anyhow::anyhow!("Secure random source failed: {e}"))?;
        self.serve.secure_random = SecureRandom::from(secret);
        Ok(true)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.serve.port == 0 {
            anyhow::bail!("'serve.port' must be a non-zero port");
        }

        if self.proxy.enabled {
            if self.proxy.address.trim().is_empty() {
                anyhow::bail!("'proxy.address' is required when the upstream proxy is enabled");
            }
            if self.proxy.port == 0 {
                anyhow::bail!("'proxy.port' must be a non-zero port when the upstream proxy is enabled");
            }
        }

        Ok(())
    }

    /// The read-only view of this configuration exposed to rule templates.
    pub fn server_context(&self) -> ServerContext {
        ServerContext::new(
            self.serve.address.clone(),
            self.serve.port,
            self.serve.secure_random.as_bytes().to_vec(),
        )
    }

    /// The `host:port` that obfuscated links point at.
    pub fn public_authority(&self) -> String {
        let host = match self.obfuscation.public_host.as_deref() {
            Some(host) if !host.trim().is_empty() => host.trim(),
            _ => local_host_name(&self.serve.address),
        };
        if host.parse::<Ipv6Addr>().is_ok() {
            format!("[{host}]:{}", self.serve.port)
        } else {
            format!("{host}:{}", self.serve.port)
        }
    }
}

/// Unspecified bind addresses are not reachable as link targets.
fn local_host_name(address: &str) -> &str {
    match address.trim() {
        "" | "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other,
    }
}
