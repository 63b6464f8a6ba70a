//! Content-coding handling around body rewriting.
//!
//! Substitution has to see plaintext, so gzip bodies are decompressed and the
//! `Content-Encoding` header removed. The rewritten body is always sent to the
//! client identity-encoded.

use flate2::read::GzDecoder;
use hyper::header::CONTENT_ENCODING;
use hyper::HeaderMap;
use std::io::Read;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    /// A coding the rewriter cannot decode
    Other(String),
}

impl ContentCoding {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers.get(CONTENT_ENCODING) else {
            return ContentCoding::Identity;
        };
        let value = value
            .to_str()
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match value.as_str() {
            "" | "identity" => ContentCoding::Identity,
            "gzip" | "x-gzip" => ContentCoding::Gzip,
            other => ContentCoding::Other(other.to_string()),
        }
    }
}

/// Result of preparing a body for rewriting.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodedBody {
    /// Plaintext, safe to rewrite
    Plain(Vec<u8>),
    /// Still encoded with a coding that could not be removed
    Opaque(Vec<u8>),
}

/// Strip the content coding from `body`, updating `headers` to match.
///
/// Gzip decompression errors are logged and whatever was decompressed before
/// the error is returned, so a corrupt body degrades to a truncated one.
pub fn decode_body(headers: &mut HeaderMap, body: &[u8]) -> DecodedBody {
    match ContentCoding::from_headers(headers) {
        ContentCoding::Identity => DecodedBody::Plain(body.to_vec()),
        ContentCoding::Gzip => {
            headers.remove(CONTENT_ENCODING);
            DecodedBody::Plain(gunzip_lossy(body))
        }
        ContentCoding::Other(coding) => {
            debug!("Leaving body with content-encoding '{}' untouched", coding);
            DecodedBody::Opaque(body.to_vec())
        }
    }
}

/// Decompress gzip data, keeping any output produced before an error.
pub fn gunzip_lossy(data: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    if let Err(e) = decoder.read_to_end(&mut out) {
        error!(
            "Failed to decompress gzip body after {} bytes: {}",
            out.len(),
            e
        );
    }
    out
}
