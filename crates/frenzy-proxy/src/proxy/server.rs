//! ProxyServer struct and main run loop.
//!
//! This module contains the ProxyServer struct which holds all state,
//! and the main run loop that accepts connections and handles requests.

use super::client::{create_http_client, HttpClient};
use super::context::RequestHandlerContext;
use super::handler::handle_request;
use super::static_files::StaticFiles;
use crate::config::Config;
use crate::rewrite::UrlObfuscator;
use crate::rules::RuleSet;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// The main proxy server struct.
pub struct ProxyServer {
    config: Arc<Config>,
    rules: RuleSet,
    obfuscator: Option<UrlObfuscator>,
    static_files: Option<StaticFiles>,
    http_client: HttpClient,
}

impl ProxyServer {
    /// Create a new ProxyServer from configuration. Fails if any rule cannot
    /// be compiled or rendered.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let rules = RuleSet::compile(&config.rules, config.server_context())?;

        let obfuscator = if config.obfuscation.enabled {
            Some(UrlObfuscator::new(&config.public_authority()))
        } else {
            None
        };

        let static_files = config
            .serve
            .static_dir
            .as_deref()
            .filter(|dir| !dir.trim().is_empty())
            .map(StaticFiles::new);

        let http_client = create_http_client(&config)?;

        Ok(Self {
            config: Arc::new(config),
            rules,
            obfuscator,
            static_files,
            http_client,
        })
    }

    /// Bind the configured address and run until the listener fails.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let host = self
            .config
            .serve
            .address
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = self.config.serve.port;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind {host} port {port}: {e}"))?;
        self.run_with_listener(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn run_with_listener(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        info!("Listening on http://{}", listener.local_addr()?);
        info!("Loaded {} rewrite rules", self.rules.len());
        if let Some(ref obfuscator) = self.obfuscator {
            info!("URL obfuscation enabled: {:?}", obfuscator);
        }
        if let Some(ref static_files) = self.static_files {
            info!("Serving static files from {}", static_files.root().display());
        }
        if let Some(proxy_url) = self.config.proxy.url() {
            info!("Outbound requests go through {}", proxy_url);
        }

        let server = Arc::new(self);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = Arc::clone(&server);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle_request_internal(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!(
                        "Error serving HTTP connection from {}: {}",
                        remote_addr, err
                    );
                }
            });
        }
    }

    /// Internal request handler that builds the context and delegates to handler module.
    async fn handle_request_internal(
        &self,
        req: hyper::Request<hyper::body::Incoming>,
    ) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
        let ctx = RequestHandlerContext {
            http_client: &self.http_client,
            rules: &self.rules,
            obfuscator: self.obfuscator.as_ref(),
            static_files: self.static_files.as_ref(),
        };

        handle_request(&ctx, req).await
    }
}
