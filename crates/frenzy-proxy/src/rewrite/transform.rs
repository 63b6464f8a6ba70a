//! Body transform pipeline.
//!
//! A response body passes through an ordered list of transforms. Each
//! transform receives the previous one's output. A transform that fails is
//! logged and skipped: its input is handed unchanged to the next one.

use super::obfuscate::UrlObfuscator;
use crate::rules::{CompiledRule, RuleError, ServerContext};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// One step of the body pipeline.
#[derive(Debug, Clone, Copy)]
pub enum Transform<'a> {
    /// Literal search/replace driven by a configured rule
    Substitute {
        rule: &'a CompiledRule,
        context: &'a ServerContext,
    },
    /// Rewrite embedded URLs to point at the proxy
    Obfuscate(&'a UrlObfuscator),
}

impl<'a> Transform<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Transform::Substitute { rule, .. } => &rule.name,
            Transform::Obfuscate(_) => "url-obfuscation",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Transform::Substitute { .. } => "Replaces the rule's search value with its replace value",
            Transform::Obfuscate(_) => "Replaces URL authorities with encoded links to the proxy",
        }
    }

    /// Informational only. The pipeline never reorders by priority.
    pub fn priority(&self) -> i32 {
        match self {
            Transform::Substitute { .. } => 0,
            Transform::Obfuscate(_) => 10,
        }
    }

    pub fn process(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        match self {
            Transform::Substitute { rule, context } => {
                let rendered = rule.render(context)?;
                Ok(rendered.apply_bytes(input).into_owned())
            }
            Transform::Obfuscate(obfuscator) => Ok(obfuscator.obfuscate(input)),
        }
    }
}

/// Run `transforms` in slice order over `body`.
pub fn run_pipeline(transforms: &[Transform<'_>], body: Vec<u8>) -> Vec<u8> {
    transforms.iter().fold(body, |current, transform| {
        match transform.process(&current) {
            Ok(next) => {
                debug!(
                    "Transform '{}' produced {} bytes from {}",
                    transform.name(),
                    next.len(),
                    current.len()
                );
                next
            }
            Err(e) => {
                warn!("Transform '{}' failed, passing body through: {}", transform.name(), e);
                current
            }
        }
    })
}
