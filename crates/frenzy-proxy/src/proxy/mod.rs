//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and main run loop
//! - `handler` - Per-request rewrite and forward flow
//! - `forwarding` - Sending requests upstream and error responses
//! - `client` - HTTP client creation and configuration
//! - `static_files` - Assets served under `/static/`

mod client;
mod context;
mod forwarding;
mod handler;
mod server;
mod static_files;

pub use client::{create_http_client, HttpClient};
pub use context::{RequestHandlerContext, RequestInfo};
pub use forwarding::{dispatch, error_response, ForwardError, UpstreamResponse, UPSTREAM_FAILURE_STATUS};
pub use handler::handle_request;
pub use server::ProxyServer;
pub use static_files::{StaticFiles, STATIC_PATH_PREFIX};
