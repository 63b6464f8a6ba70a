//! Compiled rules and the template context binder.
//!
//! Rules are compiled once at startup into a [`RuleSet`]. Each rule keeps its
//! compiled `search` and `replace` templates and is rendered against the
//! [`ServerContext`] when applied. Startup renders every rule once so that a
//! rule which cannot be rendered stops the process instead of failing per
//! request.

use crate::config::{Rule, RuleModule};
use crate::template::{Template, TemplateEngine, TemplateError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use memchr::memmem::Finder;
use rhai::Scope;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{rule}': invalid search template: {source}")]
    Search { rule: String, source: TemplateError },
    #[error("rule '{rule}': invalid replace template: {source}")]
    Replace { rule: String, source: TemplateError },
}

/// Read-only server values exposed to rule templates.
#[derive(Debug, Clone)]
pub struct ServerContext {
    address: String,
    port: u16,
    secure_random: Vec<u8>,
    secure_random_b64: String,
}

impl ServerContext {
    pub fn new(address: impl Into<String>, port: u16, secure_random: Vec<u8>) -> Self {
        let secure_random_b64 = BASE64.encode(&secure_random);
        Self {
            address: address.into(),
            port,
            secure_random,
            secure_random_b64,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn secure_random(&self) -> &[u8] {
        &self.secure_random
    }

    pub(crate) fn scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        scope.push_constant("address", self.address.clone());
        scope.push_constant("port", i64::from(self.port));
        scope.push_constant("secure_random", self.secure_random_b64.clone());
        scope
    }
}

/// A rule with its templates compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub module: RuleModule,
    search: Template,
    replace: Template,
}

impl CompiledRule {
    pub fn compile(rule: &Rule, engine: &TemplateEngine) -> Result<Self, RuleError> {
        let search = engine
            .compile(&rule.search)
            .map_err(|source| RuleError::Search {
                rule: rule.name.clone(),
                source,
            })?;
        let replace = engine
            .compile(&rule.replace)
            .map_err(|source| RuleError::Replace {
                rule: rule.name.clone(),
                source,
            })?;

        debug!(
            "Compiled rule '{}' ({}): {:?} -> {:?}",
            rule.name,
            rule.module().as_str(),
            search.source(),
            replace.source()
        );

        Ok(Self {
            name: rule.name.clone(),
            module: rule.module(),
            search,
            replace,
        })
    }

    /// Evaluate both templates against the server context.
    pub fn render(&self, ctx: &ServerContext) -> Result<RenderedRule, RuleError> {
        let search = self.search.render(ctx).map_err(|source| RuleError::Search {
            rule: self.name.clone(),
            source,
        })?;
        let replace = self
            .replace
            .render(ctx)
            .map_err(|source| RuleError::Replace {
                rule: self.name.clone(),
                source,
            })?;
        Ok(RenderedRule::new(search, replace))
    }
}

/// Concrete search/replace values of a rule, with the byte searcher built
/// once so it can be reused across header values and the body.
#[derive(Clone)]
pub struct RenderedRule {
    pub search: String,
    pub replace: String,
    finder: Finder<'static>,
}

impl RenderedRule {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        let search = search.into();
        let finder = Finder::new(search.as_bytes()).into_owned();
        Self {
            search,
            replace: replace.into(),
            finder,
        }
    }

    /// Replace every non-overlapping occurrence of `search`, left to right.
    /// An empty `search` leaves the input untouched.
    pub fn apply_str<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if self.search.is_empty() || !input.contains(self.search.as_str()) {
            return Cow::Borrowed(input);
        }
        Cow::Owned(input.replace(self.search.as_str(), &self.replace))
    }

    /// Byte-level counterpart of [`apply_str`](Self::apply_str).
    pub fn apply_bytes<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        if self.search.is_empty() {
            return Cow::Borrowed(input);
        }
        let mut matches = self.finder.find_iter(input).peekable();
        if matches.peek().is_none() {
            return Cow::Borrowed(input);
        }

        let needle_len = self.search.len();
        let mut out = Vec::with_capacity(input.len());
        let mut last = 0;
        for start in matches {
            out.extend_from_slice(&input[last..start]);
            out.extend_from_slice(self.replace.as_bytes());
            last = start + needle_len;
        }
        out.extend_from_slice(&input[last..]);
        Cow::Owned(out)
    }
}

impl PartialEq for RenderedRule {
    fn eq(&self, other: &Self) -> bool {
        self.search == other.search && self.replace == other.replace
    }
}

impl Eq for RenderedRule {}

impl fmt::Debug for RenderedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedRule")
            .field("search", &self.search)
            .field("replace", &self.replace)
            .finish()
    }
}

/// Ordered, immutable rule table bound to the server context.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    context: ServerContext,
}

impl RuleSet {
    /// Compile every rule and render it once. Any failure is a configuration
    /// error.
    pub fn compile(rules: &[Rule], context: ServerContext) -> Result<Self, RuleError> {
        let engine = TemplateEngine::new();
        let compiled = rules
            .iter()
            .map(|rule| CompiledRule::compile(rule, &engine))
            .collect::<Result<Vec<_>, _>>()?;

        for rule in &compiled {
            rule.render(&context)?;
        }

        Ok(Self {
            rules: compiled,
            context,
        })
    }

    pub fn empty(context: ServerContext) -> Self {
        Self {
            rules: Vec::new(),
            context,
        }
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Render all rules in order. A rule that fails to render is logged and
    /// left out.
    pub fn render_all(&self) -> Vec<(&CompiledRule, RenderedRule)> {
        self.rules
            .iter()
            .filter_map(|rule| match rule.render(&self.context) {
                Ok(rendered) => Some((rule, rendered)),
                Err(e) => {
                    warn!("Skipping rule: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ServerContext {
        ServerContext::new("127.0.0.1", 8080, vec![7; 4])
    }

    fn rendered(search: &str, replace: &str) -> RenderedRule {
        RenderedRule::new(search, replace)
    }

    #[test]
    fn test_compile_and_render_literal_rule() {
        let rule = Rule::new("host", "http://localhost:8080", "https://example.org");
        let compiled = CompiledRule::compile(&rule, &TemplateEngine::new()).unwrap();
        assert_eq!(compiled.module, RuleModule::Substitute);
        assert_eq!(
            compiled.render(&ctx()).unwrap(),
            rendered("http://localhost:8080", "https://example.org")
        );
    }

    #[test]
    fn test_render_templated_rule() {
        let rule = Rule::new(
            "back to proxy",
            "https://example.org",
            "http://{{ address }}:{{ port }}",
        );
        let compiled = CompiledRule::compile(&rule, &TemplateEngine::new()).unwrap();
        assert_eq!(
            compiled.render(&ctx()).unwrap().replace,
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn test_compile_error_names_rule() {
        let rule = Rule::new("broken", "{{ port", "x");
        let err = CompiledRule::compile(&rule, &TemplateEngine::new()).unwrap_err();
        assert!(matches!(err, RuleError::Search { .. }));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_rule_set_rejects_unrenderable_rule() {
        let rules = vec![Rule::new("div", "a", "{{ port / 0 }}")];
        let err = RuleSet::compile(&rules, ctx()).unwrap_err();
        assert!(matches!(err, RuleError::Replace { .. }));
    }

    #[test]
    fn test_rule_set_preserves_order() {
        let rules = vec![
            Rule::new("second", "b", "c"),
            Rule::new("first", "a", "b"),
        ];
        let set = RuleSet::compile(&rules, ctx()).unwrap();
        let names: Vec<&str> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
        assert_eq!(set.render_all().len(), 2);
    }

    #[test]
    fn test_apply_str_replaces_all() {
        let rule = rendered("foo", "bar");
        assert_eq!(rule.apply_str("foo/foo/x"), "bar/bar/x");
    }

    #[test]
    fn test_apply_str_no_match_borrows() {
        let rule = rendered("foo", "bar");
        assert!(matches!(rule.apply_str("nothing here"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_apply_empty_search_is_noop() {
        let rule = rendered("", "x");
        assert_eq!(rule.apply_str("abc"), "abc");
        assert_eq!(rule.apply_bytes(b"abc").as_ref(), b"abc");
    }

    #[test]
    fn test_apply_bytes_non_overlapping() {
        let rule = rendered("aa", "b");
        assert_eq!(rule.apply_bytes(b"aaaaa").as_ref(), b"bba");
    }

    #[test]
    fn test_rendered_rule_reused_across_inputs() {
        let rule = rendered("example.org", "proxy.test");
        assert_eq!(
            rule.apply_bytes(b"https://example.org/a").as_ref(),
            b"https://proxy.test/a"
        );
        assert_eq!(
            rule.apply_bytes(b"example.org example.org").as_ref(),
            b"proxy.test proxy.test"
        );
        assert!(matches!(rule.apply_bytes(b"other.host"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_apply_bytes_non_utf8_input() {
        let rule = rendered("host", "proxy");
        let input = [0xff, b'h', b'o', b's', b't', 0xfe];
        assert_eq!(
            rule.apply_bytes(&input).as_ref(),
            &[0xff, b'p', b'r', b'o', b'x', b'y', 0xfe]
        );
    }
}
