//! URL obfuscation.
//!
//! Every `://host[:port]` fragment in a body is replaced with a link to the
//! proxy itself whose last path segment is the base32 encoding of the
//! original fragment:
//!
//! ```text
//! https://example.org/path
//!   -> https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/path
//! ```
//!
//! The proxy does not route `/x.x/` paths back to their origin.

use aho_corasick::{AhoCorasick, MatchKind};
use data_encoding::BASE32;
use regex::bytes::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Path prefix of obfuscated links.
pub const OBFUSCATED_PATH_PREFIX: &str = "/x.x/";

/// Scheme separator followed by everything up to the next `/`. Byte mode so
/// non-UTF-8 bodies are scanned too.
static URL_FRAGMENT_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_url_fragment_regex() -> &'static Regex {
    URL_FRAGMENT_REGEX.get_or_init(|| Regex::new(r"(?-u)://[^/]+").unwrap())
}

#[derive(Debug, Clone)]
pub struct UrlObfuscator {
    prefix: String,
}

impl UrlObfuscator {
    /// `authority` is the `host:port` the obfuscated links point at.
    pub fn new(authority: &str) -> Self {
        Self {
            prefix: format!("://{authority}{OBFUSCATED_PATH_PREFIX}"),
        }
    }

    /// Replacement for one matched fragment. Identical fragments always map
    /// to identical replacements.
    pub fn encode_fragment(&self, fragment: &[u8]) -> Vec<u8> {
        let mut out = self.prefix.clone().into_bytes();
        out.extend_from_slice(BASE32.encode(fragment).as_bytes());
        out
    }

    /// Replace every occurrence of every fragment found in `body`.
    ///
    /// Distinct fragments are collected in the order first seen and then
    /// substituted together in one left-to-right pass. A fragment is replaced
    /// wherever it occurs, including inside a longer host, and text produced
    /// by a replacement is never scanned again. At any position the fragment
    /// seen first wins.
    pub fn obfuscate(&self, body: &[u8]) -> Vec<u8> {
        let mut fragments: Vec<&[u8]> = Vec::new();
        for m in get_url_fragment_regex().find_iter(body) {
            if !fragments.contains(&m.as_bytes()) {
                fragments.push(m.as_bytes());
            }
        }
        if fragments.is_empty() {
            return body.to_vec();
        }

        let searcher = match AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build(&fragments)
        {
            Ok(searcher) => searcher,
            Err(e) => {
                warn!("Failed to build URL fragment searcher: {}", e);
                return body.to_vec();
            }
        };

        let replacements: Vec<Vec<u8>> = fragments
            .iter()
            .map(|fragment| {
                let replacement = self.encode_fragment(fragment);
                debug!(
                    "Obfuscating {} as {}",
                    String::from_utf8_lossy(fragment),
                    String::from_utf8_lossy(&replacement)
                );
                replacement
            })
            .collect();

        searcher.replace_all_bytes(body, &replacements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obfuscator() -> UrlObfuscator {
        UrlObfuscator::new("localhost:8080")
    }

    #[test]
    fn test_encode_fragment() {
        assert_eq!(
            obfuscator().encode_fragment(b"://example.org"),
            b"://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=".to_vec()
        );
    }

    #[test]
    fn test_path_left_untouched() {
        let out = obfuscator().obfuscate(br#"<a href="https://example.org/path">"#);
        assert_eq!(
            out,
            br#"<a href="https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/path">"#.to_vec()
        );
    }

    #[test]
    fn test_identical_fragments_encoded_identically() {
        let body = b"http://example.org/a https://example.org/b ftp://example.org/c";
        let out = String::from_utf8(obfuscator().obfuscate(body)).unwrap();
        assert_eq!(
            out,
            "http://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/a \
             https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/b \
             ftp://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/c"
        );
    }

    #[test]
    fn test_port_is_part_of_fragment() {
        let out = obfuscator().obfuscate(b"https://cdn.example.net:8443/app.js");
        assert_eq!(
            out,
            b"https://localhost:8080/x.x/HIXS6Y3ENYXGK6DBNVYGYZJONZSXIORYGQ2DG===/app.js".to_vec()
        );
    }

    #[test]
    fn test_replacements_are_not_rescanned() {
        let once = obfuscator().obfuscate(b"https://example.org/");
        assert_eq!(
            once,
            b"https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/".to_vec()
        );
    }

    #[test]
    fn test_earlier_fragment_replaced_inside_longer_host() {
        let out = obfuscator().obfuscate(b"https://example.org/a https://example.org.evil/b");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/a \
             https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=.evil/b"
        );
    }

    #[test]
    fn test_longer_host_seen_first_keeps_own_encoding() {
        let out = obfuscator().obfuscate(b"https://example.org.evil/b https://example.org/a");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZZOMV3GS3A=/b \
             https://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/a"
        );
    }

    #[test]
    fn test_body_without_urls_unchanged() {
        let body = b"no links here, just text / and slashes";
        assert_eq!(obfuscator().obfuscate(body), body.to_vec());
    }

    #[test]
    fn test_non_utf8_bytes_scanned() {
        let out = obfuscator().obfuscate(b"\xff://example.org/\xfe");
        assert_eq!(
            out,
            b"\xff://localhost:8080/x.x/HIXS6ZLYMFWXA3DFFZXXEZY=/\xfe".to_vec()
        );
    }
}
