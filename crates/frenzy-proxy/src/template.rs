//! Rule templates.
//!
//! A rule's `search` and `replace` values are templates: literal text with
//! `{{ expression }}` placeholders. Expressions are Rhai expressions evaluated
//! against the [`ServerContext`] the proxy was started with.
//!
//! # Context Variables
//!
//! - `address` - The address the proxy listens on
//! - `port` - The port the proxy listens on
//! - `secure_random` - The deployment secret, base64 encoded
//!
//! # Functions
//!
//! - `hasPermission(feature)` - Permission check; always `false` in-core
//!
//! # Example
//!
//! ```yaml
//! rule:
//!   - Name: point links back at the proxy
//!     Search: https://example.org
//!     Replace: 'http://{{ address }}:{{ port }}'
//! ```
//!
//! Only expressions are accepted: statements, loops and assignments fail to
//! compile, `eval` is disabled and evaluation is bounded in operations.

use crate::rules::ServerContext;
use regex::Regex;
use rhai::{Dynamic, Engine, AST};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Regex for matching placeholders: {{ port }}, {{ hasPermission("x") }}, etc.
static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_placeholder_regex() -> &'static Regex {
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"(?s)\{\{(.*?)\}\}").unwrap())
}

const MAX_OPERATIONS: u64 = 10_000;
const MAX_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
    #[error("empty placeholder at byte {0}")]
    EmptyExpression(usize),
    #[error("invalid expression `{expr}`: {message}")]
    Compile { expr: String, message: String },
    #[error("failed to evaluate `{expr}`: {message}")]
    Render { expr: String, message: String },
}

/// Shared, sandboxed expression engine used to compile and render templates.
#[derive(Clone)]
pub struct TemplateEngine {
    engine: Arc<Engine>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(Self::create_engine()),
        }
    }

    fn create_engine() -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.disable_symbol("eval");

        // Real policy lives outside the proxy
        engine.register_fn("hasPermission", |_feature: &str| -> bool { false });

        engine
    }

    /// Compile a template. Fails on unterminated or invalid placeholders.
    pub fn compile(&self, source: &str) -> Result<Template, TemplateError> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for caps in get_placeholder_regex().captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            push_literal(&mut segments, source, cursor, whole.start())?;

            let expr = caps[1].trim();
            if expr.is_empty() {
                return Err(TemplateError::EmptyExpression(whole.start()));
            }
            let ast = self
                .engine
                .compile_expression(expr)
                .map_err(|e| TemplateError::Compile {
                    expr: expr.to_string(),
                    message: e.to_string(),
                })?;
            segments.push(Segment::Expr {
                source: expr.to_string(),
                ast,
            });
            cursor = whole.end();
        }
        push_literal(&mut segments, source, cursor, source.len())?;

        Ok(Template {
            source: source.to_string(),
            segments,
            engine: Arc::clone(&self.engine),
        })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn push_literal(
    segments: &mut Vec<Segment>,
    source: &str,
    start: usize,
    end: usize,
) -> Result<(), TemplateError> {
    let text = &source[start..end];
    if let Some(offset) = text.find("{{") {
        return Err(TemplateError::Unterminated(start + offset));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

#[derive(Clone)]
enum Segment {
    Literal(String),
    Expr { source: String, ast: AST },
}

/// A compiled template, immutable and safe to share across requests.
#[derive(Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
    engine: Arc<Engine>,
}

impl Template {
    /// The template text as configured.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the template contains no placeholders.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Render the template against the server context.
    pub fn render(&self, ctx: &ServerContext) -> Result<String, TemplateError> {
        if self.is_literal() {
            return Ok(self.source.clone());
        }

        let mut scope = ctx.scope();
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr { source, ast } => {
                    let value: Dynamic = self
                        .engine
                        .eval_ast_with_scope(&mut scope, ast)
                        .map_err(|e| TemplateError::Render {
                            expr: source.clone(),
                            message: e.to_string(),
                        })?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("source", &self.source)
            .field("segments", &self.segments.len())
            .finish()
    }
}
