//! Response rewriting.
//!
//! Header values and the body go through the same rules as the request URL.
//! The body is decoded first, then run through the transform pipeline, and
//! finally re-framed with a `Content-Length` that matches its new size.
//! Responses that carry no body (`HEAD`, 1xx, 204, 304) only get their
//! headers rewritten.

use super::encoding::{decode_body, DecodedBody};
use super::obfuscate::UrlObfuscator;
use super::transform::{run_pipeline, Transform};
use crate::rules::RuleSet;
use bytes::Bytes;
use hyper::header::{HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{HeaderMap, Method, StatusCode};
use std::borrow::Cow;
use tracing::{debug, warn};

/// How the client response is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Body is rewritten and `Content-Length` recomputed
    Body,
    /// Answer to `HEAD`: upstream `Content-Length` describes the resource
    /// and is kept as is
    HeadersOnly,
    /// 1xx, 204 and 304 never carry a body or a `Content-Length`
    NoBody,
}

impl Framing {
    pub fn for_response(method: &Method, status: StatusCode) -> Self {
        if status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            Framing::NoBody
        } else if *method == Method::HEAD {
            Framing::HeadersOnly
        } else {
            Framing::Body
        }
    }
}

/// Rewrite a response in place and return the new body.
pub fn rewrite_response(
    headers: &mut HeaderMap,
    body: Bytes,
    framing: Framing,
    rules: &RuleSet,
    obfuscator: Option<&UrlObfuscator>,
) -> Bytes {
    rewrite_headers(headers, rules);

    match framing {
        Framing::Body => {}
        Framing::HeadersOnly => {
            headers.remove(TRANSFER_ENCODING);
            return Bytes::new();
        }
        Framing::NoBody => {
            headers.remove(TRANSFER_ENCODING);
            headers.remove(CONTENT_LENGTH);
            return Bytes::new();
        }
    }

    let body = match decode_body(headers, &body) {
        DecodedBody::Plain(plain) => {
            let transforms = build_transforms(rules, obfuscator);
            run_pipeline(&transforms, plain)
        }
        DecodedBody::Opaque(encoded) => encoded,
    };

    set_content_length(headers, body.len());
    Bytes::from(body)
}

/// The response pipeline: every rule in order, then obfuscation when enabled.
pub fn build_transforms<'a>(
    rules: &'a RuleSet,
    obfuscator: Option<&'a UrlObfuscator>,
) -> Vec<Transform<'a>> {
    let mut transforms: Vec<Transform<'a>> = rules
        .iter()
        .map(|rule| Transform::Substitute {
            rule,
            context: rules.context(),
        })
        .collect();
    if let Some(obfuscator) = obfuscator {
        transforms.push(Transform::Obfuscate(obfuscator));
    }
    transforms
}

/// Apply every rule to every header value. Values are treated as bytes so
/// opaque headers survive; a result that is not a valid header value leaves
/// the original in place.
pub fn rewrite_headers(headers: &mut HeaderMap, rules: &RuleSet) {
    let rendered = rules.render_all();
    if rendered.is_empty() {
        return;
    }

    for (name, value) in headers.iter_mut() {
        let mut current: Cow<'_, [u8]> = Cow::Borrowed(value.as_bytes());
        for (_, rule) in &rendered {
            let next = match rule.apply_bytes(&current) {
                Cow::Owned(next) => Some(next),
                Cow::Borrowed(_) => None,
            };
            if let Some(next) = next {
                current = Cow::Owned(next);
            }
        }

        let Cow::Owned(new_value) = current else {
            continue;
        };
        match HeaderValue::from_bytes(&new_value) {
            Ok(new_value) => {
                debug!("Rewrote response header '{}'", name);
                *value = new_value;
            }
            Err(e) => warn!("Rewritten value for header '{}' is invalid: {}", name, e),
        }
    }
}

fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}
