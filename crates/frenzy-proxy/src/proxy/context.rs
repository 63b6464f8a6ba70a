use super::client::HttpClient;
use super::static_files::StaticFiles;
use crate::rewrite::UrlObfuscator;
use crate::rules::RuleSet;
use hyper::Request;

/// Context for handling a request, containing all necessary state.
pub struct RequestHandlerContext<'a> {
    pub http_client: &'a HttpClient,
    pub rules: &'a RuleSet,
    pub obfuscator: Option<&'a UrlObfuscator>,
    pub static_files: Option<&'a StaticFiles>,
}

/// Extracted request metadata
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub method: hyper::Method,
    pub uri: hyper::Uri,
    pub headers: hyper::HeaderMap,
}

impl RequestInfo {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        }
    }

    /// Host the client addressed, for log lines.
    pub fn host(&self) -> &str {
        self.uri
            .host()
            .or_else(|| {
                self.headers
                    .get(hyper::header::HOST)
                    .and_then(|v| v.to_str().ok())
            })
            .unwrap_or("-")
    }
}
