//! Scope selectors attached to elements.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Comma separated list of scope alternatives such as `source.ruby, text.html.erb`.
///
/// An alternative matches a scope when it equals the scope or is a dotted prefix of it, so
/// `source.ruby` matches `source.ruby.rails` but not `source.rubyx`. An empty selector matches
/// every scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ScopeSelector {
    alternatives: Vec<String>,
}

impl ScopeSelector {
    pub fn parse(raw: &str) -> Self {
        let alternatives = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect();
        Self { alternatives }
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    pub fn matches(&self, scope: &str) -> bool {
        if self.alternatives.is_empty() {
            return true;
        }
        self.alternatives
            .iter()
            .any(|alternative| alternative_matches(alternative, scope))
    }

    /// True when any queried scope matches. An empty query matches nothing.
    pub fn matches_any<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        scopes.iter().any(|scope| self.matches(scope.as_ref()))
    }
}

fn alternative_matches(alternative: &str, scope: &str) -> bool {
    match scope.strip_prefix(alternative) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

impl From<&str> for ScopeSelector {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for ScopeSelector {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ScopeSelector> for String {
    fn from(value: ScopeSelector) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alternatives.join(", "))
    }
}
