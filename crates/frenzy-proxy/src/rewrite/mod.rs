//! Request and response rewriting.

pub mod encoding;
pub mod obfuscate;
pub mod request;
pub mod response;
pub mod transform;

use thiserror::Error;

pub use encoding::{decode_body, ContentCoding, DecodedBody};
pub use obfuscate::{UrlObfuscator, OBFUSCATED_PATH_PREFIX};
pub use request::{remove_hop_by_hop, rewrite_request, OutboundRequest};
pub use response::{rewrite_response, Framing};
pub use transform::{run_pipeline, Transform, TransformError};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewritten URL '{url}' is invalid: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("rewritten URL '{0}' is not absolute")]
    NotAbsolute(String),
}
