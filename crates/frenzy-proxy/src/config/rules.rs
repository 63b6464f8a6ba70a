//! Rewrite rule records as they appear in the settings file.

use serde::{Deserialize, Serialize};

/// A named search/replace pair. Both values may contain `{{ expression }}`
/// placeholders; see [`crate::template`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    #[serde(rename = "Name", alias = "name", default)]
    pub name: String,
    #[serde(rename = "Search", alias = "search")]
    pub search: String,
    #[serde(rename = "Replace", alias = "replace", default)]
    pub replace: String,
    /// Transformer family interpreting the rule (default: substitute)
    #[serde(
        rename = "Module",
        alias = "module",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub module: Option<RuleModule>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleModule {
    /// Literal substring replacement
    #[default]
    Substitute,
}

impl RuleModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleModule::Substitute => "substitute",
        }
    }
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        search: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            search: search.into(),
            replace: replace.into(),
            module: None,
        }
    }

    pub fn module(&self) -> RuleModule {
        self.module.unwrap_or_default()
    }
}
