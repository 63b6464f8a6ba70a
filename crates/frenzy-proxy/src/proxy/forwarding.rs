//! Request forwarding to upstream servers.

use super::client::HttpClient;
use crate::rewrite::OutboundRequest;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{HeaderMap, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, error};

/// Status returned when the upstream cannot be reached or read.
pub const UPSTREAM_FAILURE_STATUS: u16 = 509;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to send request to {url}: {source}")]
    Dispatch { url: String, source: reqwest::Error },
    #[error("failed to read response body from {url}: {source}")]
    ReadBody { url: String, source: reqwest::Error },
}

/// Helper function to create an error response.
pub fn error_response(status: u16, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// A fully buffered upstream response.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Send the rewritten request and buffer the whole response.
pub async fn dispatch(
    http_client: &HttpClient,
    req: &OutboundRequest,
) -> Result<UpstreamResponse, ForwardError> {
    let url = req.uri.to_string();
    debug!("Forwarding {} {}", req.method, url);

    let mut headers = req.headers.clone();
    if let Ok(host) = HeaderValue::from_str(&req.host) {
        headers.insert(HOST, host);
    }

    let mut builder = http_client
        .request(req.method.clone(), url.as_str())
        .headers(headers);
    if !req.body.is_empty() {
        builder = builder.body(req.body.clone());
    }

    let response = builder.send().await.map_err(|source| {
        error!("Failed to forward request to {}: {}", url, source);
        ForwardError::Dispatch {
            url: url.clone(),
            source,
        }
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(|source| {
        error!("Failed to collect upstream response body from {}: {}", url, source);
        ForwardError::ReadBody {
            url: url.clone(),
            source,
        }
    })?;

    debug!("Upstream {} answered {} ({} bytes)", url, status, body.len());
    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}
