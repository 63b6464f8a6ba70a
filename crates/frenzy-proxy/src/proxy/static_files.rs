//! Static assets served by the proxy itself under `/static/`.
//!
//! These requests never reach the rewrite engine.

use super::forwarding::error_response;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub const STATIC_PATH_PREFIX: &str = "/static/";

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether this request path belongs to the static handler.
    pub fn matches(path: &str) -> bool {
        path.starts_with(STATIC_PATH_PREFIX)
    }

    pub async fn serve(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        if *method != Method::GET && *method != Method::HEAD {
            return error_response(405, "Method not allowed");
        }

        let Some(file) = self.resolve(path) else {
            debug!("Rejected static path {}", path);
            return error_response(404, "Not found");
        };

        let contents = match tokio::fs::read(&file).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Static file {} unavailable: {}", file.display(), e);
                return error_response(404, "Not found");
            }
        };

        let len = contents.len();
        let body = if *method == Method::HEAD {
            Bytes::new()
        } else {
            Bytes::from(contents)
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = StatusCode::OK;
        let mime = mime_guess::from_path(&file).first_or_octet_stream();
        let content_type = HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
        response.headers_mut().insert(CONTENT_TYPE, content_type);
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(len));
        response
    }

    /// Map a request path onto a file below the root. Anything that could
    /// escape the root yields `None`.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = path.strip_prefix(STATIC_PATH_PREFIX)?;
        if relative.is_empty() || relative.contains('\\') {
            return None;
        }

        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}
