//! Request handling.
//!
//! Every request other than a static asset goes through the same steps:
//! buffer the body, copy the request, rewrite the copy's URL, send it
//! upstream, then rewrite the response headers and body before answering.

use super::context::{RequestHandlerContext, RequestInfo};
use super::forwarding::{dispatch, error_response, UpstreamResponse, UPSTREAM_FAILURE_STATUS};
use super::static_files::StaticFiles;
use crate::rewrite::{
    remove_hop_by_hop, rewrite_request, rewrite_response, Framing, OutboundRequest,
};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::fmt::Display;
use tracing::{debug, error, info};

/// Handle an incoming request.
pub async fn handle_request<B>(
    ctx: &RequestHandlerContext<'_>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let start_time = std::time::Instant::now();
    let info = RequestInfo::from_request(&req);
    debug!("Received request: {} {} (host {})", info.method, info.uri, info.host());

    if let Some(static_files) = ctx.static_files {
        if StaticFiles::matches(info.uri.path()) {
            return Ok(static_files.serve(&info.method, info.uri.path()).await);
        }
    }

    let (parts, body) = req.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("Failed to collect request body: {}", e);
            return Ok(error_response(400, "Failed to read request body"));
        }
    };

    let mut outbound = OutboundRequest::from_parts(&parts, body_bytes);
    outbound.clear_request_target();
    outbound.prefer_gzip();
    rewrite_request(&mut outbound, ctx.rules);

    let upstream = match dispatch(ctx.http_client, &outbound).await {
        Ok(upstream) => upstream,
        Err(e) => {
            return Ok(error_response(UPSTREAM_FAILURE_STATUS, &e.to_string()));
        }
    };

    let response = build_response(ctx, &info.method, upstream);
    info!(
        "{} {} -> {} {} in {:.1}ms",
        info.method,
        info.uri,
        outbound.uri,
        response.status().as_u16(),
        start_time.elapsed().as_secs_f64() * 1000.0
    );
    Ok(response)
}

/// Rewrite an upstream response into the client response.
fn build_response(
    ctx: &RequestHandlerContext<'_>,
    method: &Method,
    upstream: UpstreamResponse,
) -> Response<Full<Bytes>> {
    let UpstreamResponse {
        status,
        mut headers,
        body,
    } = upstream;

    remove_hop_by_hop(&mut headers);
    let framing = Framing::for_response(method, status);
    let body = rewrite_response(&mut headers, body, framing, ctx.rules, ctx.obfuscator);

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Rule};
    use crate::proxy::client::create_http_client;
    use crate::rewrite::UrlObfuscator;
    use crate::rules::{RuleSet, ServerContext};
    use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
    use hyper::{HeaderMap, StatusCode};

    fn rules(pairs: &[(&str, &str)]) -> RuleSet {
        let rules: Vec<Rule> = pairs
            .iter()
            .map(|(search, replace)| Rule::new(*search, *search, *replace))
            .collect();
        RuleSet::compile(&rules, ServerContext::new("127.0.0.1", 8080, vec![1])).unwrap()
    }

    fn client() -> crate::proxy::client::HttpClient {
        create_http_client(&Config::from_yaml("serve:\n  port: 8080\n").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_509() {
        let http_client = client();
        let rules = rules(&[("http://localhost:8080", "http://127.0.0.1:1")]);
        let ctx = RequestHandlerContext {
            http_client: &http_client,
            rules: &rules,
            obfuscator: None,
            static_files: None,
        };
        let req = Request::builder()
            .uri("/")
            .header("host", "localhost:8080")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = handle_request(&ctx, req).await.unwrap();
        assert_eq!(response.status().as_u16(), 509);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_static_request_bypasses_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "http://localhost:8080").unwrap();
        let static_files = StaticFiles::new(dir.path());
        let http_client = client();
        let rules = rules(&[("http://localhost:8080", "https://example.org")]);
        let ctx = RequestHandlerContext {
            http_client: &http_client,
            rules: &rules,
            obfuscator: None,
            static_files: Some(&static_files),
        };
        let req = Request::builder()
            .uri("/static/hello.txt")
            .header("host", "localhost:8080")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = handle_request(&ctx, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"http://localhost:8080"));
    }

    #[tokio::test]
    async fn test_build_response_rewrites_and_reframes() {
        let http_client = client();
        let rules = rules(&[("https://example.org", "http://localhost:8080")]);
        let obfuscator = UrlObfuscator::new("localhost:8080");
        let ctx = RequestHandlerContext {
            http_client: &http_client,
            rules: &rules,
            obfuscator: Some(&obfuscator),
            static_files: None,
        };

        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://example.org/login"));
        headers.insert("connection", HeaderValue::from_static("close"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        let upstream = UpstreamResponse {
            status: StatusCode::FOUND,
            headers,
            body: Bytes::from_static(b"<a href=\"https://cdn.test/x\">"),
        };

        let response = build_response(&ctx, &Method::GET, upstream);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "http://localhost:8080/login"
        );
        assert!(response.headers().get("connection").is_none());
        assert!(response.headers().get("transfer-encoding").is_none());

        let expected: &[u8] = b"<a href=\"https://localhost:8080/x.x/HIXS6Y3ENYXHIZLTOQ======/x\">";
        assert_eq!(
            response.headers().get(CONTENT_LENGTH).unwrap(),
            &expected.len().to_string()
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), expected);
    }

    #[tokio::test]
    async fn test_build_response_not_modified_has_no_length() {
        let http_client = client();
        let rules = rules(&[]);
        let ctx = RequestHandlerContext {
            http_client: &http_client,
            rules: &rules,
            obfuscator: None,
            static_files: None,
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("40"));
        let upstream = UpstreamResponse {
            status: StatusCode::NOT_MODIFIED,
            headers,
            body: Bytes::new(),
        };

        let response = build_response(&ctx, &Method::GET, upstream);
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(response.headers().get(CONTENT_LENGTH).is_none());
    }
}
