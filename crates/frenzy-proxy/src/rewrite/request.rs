//! Request rewriting.
//!
//! Each rule is applied to the request's absolute URL as a whole string, so a
//! single rule can change scheme, host and path at once. Rules apply in
//! configuration order and each one sees the output of the previous one.

use super::RewriteError;
use crate::rules::{RenderedRule, RuleSet};
use bytes::Bytes;
use hyper::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH, HOST};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Uri};
use tracing::{debug, warn};

/// Headers that describe the inbound connection rather than the request.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<String> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in named {
        headers.remove(name.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// An owned copy of an inbound request, ready to be rewritten and sent
/// upstream.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    /// Target authority; sent as the `Host` header.
    pub host: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Copy an inbound request. The host is taken from the request target
    /// when it is absolute, otherwise from the `Host` header.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let host = parts
            .uri
            .authority()
            .map(|a| a.to_string())
            .or_else(|| {
                parts
                    .headers
                    .get(HOST)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            host,
            headers: parts.headers.clone(),
            body,
        }
    }

    /// Drop metadata tied to the inbound connection. `Host` is re-derived
    /// from `host` and framing is recomputed when the request is sent.
    pub fn clear_request_target(&mut self) {
        remove_hop_by_hop(&mut self.headers);
        self.headers.remove(HOST);
        self.headers.remove(CONTENT_LENGTH);
    }

    /// Ask the upstream for gzip or identity content only.
    pub fn prefer_gzip(&mut self) {
        self.headers
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    }

    /// The absolute URL the rules operate on. Requests without a scheme are
    /// treated as plain HTTP to `host`.
    pub fn absolute_url(&self) -> String {
        if self.uri.scheme().is_some() {
            return self.uri.to_string();
        }
        let path = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("http://{}{}", self.host, path)
    }
}

/// Apply every rule, in order, to the request URL.
pub fn rewrite_request(req: &mut OutboundRequest, rules: &RuleSet) {
    for (rule, rendered) in rules.render_all() {
        if let Err(e) = apply_rule(req, &rendered) {
            warn!("Rule '{}' not applied to request: {}", rule.name, e);
        }
    }
}

/// Apply one rule. On failure the request is left as it was.
pub fn apply_rule(req: &mut OutboundRequest, rule: &RenderedRule) -> Result<(), RewriteError> {
    let before = req.absolute_url();
    let after = rule.apply_str(&before);
    if after == before {
        return Ok(());
    }

    let uri: Uri = after.parse().map_err(|e: hyper::http::uri::InvalidUri| {
        RewriteError::InvalidUrl {
            url: after.to_string(),
            message: e.to_string(),
        }
    })?;
    let host = match (uri.scheme(), uri.authority()) {
        (Some(_), Some(authority)) => authority.to_string(),
        _ => return Err(RewriteError::NotAbsolute(after.to_string())),
    };

    debug!("Rewrote request URL: {} -> {}", before, uri);
    req.host = host;
    req.uri = uri;
    Ok(())
}
