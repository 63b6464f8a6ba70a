// Library exports for the binary and integration tests

pub mod config;
pub mod proxy;
pub mod rewrite;
pub mod rules;
pub mod template;

pub use config::Config;
pub use proxy::ProxyServer;
pub use rules::{RuleSet, ServerContext};
