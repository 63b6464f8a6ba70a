//! HTTP client creation and configuration.
//!
//! One client is shared by all connections. It never follows redirects, so
//! `Location` headers reach the rewriter, and never decompresses, so the
//! rewriter sees the upstream's content coding.

use crate::config::Config;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = reqwest::Client;

/// Create the shared outbound client. Transport timeouts and pooling are
/// left at the client defaults.
pub fn create_http_client(config: &Config) -> Result<HttpClient, anyhow::Error> {
    let mut builder = reqwest::Client::builder().redirect(Policy::none());

    builder = match config.proxy.url() {
        Some(proxy_url) => {
            warn!(
                "Routing outbound requests through {} with TLS certificate verification DISABLED",
                proxy_url
            );
            builder
                .proxy(reqwest::Proxy::all(proxy_url.as_str())?)
                .danger_accept_invalid_certs(true)
        }
        // Environment proxy variables are ignored
        None => builder.no_proxy(),
    };

    let client = builder.build()?;
    debug!("Outbound HTTP client ready");
    Ok(client)
}
