//! Scope names and scope selectors
//!
//! A scope name is a dot-separated label such as `keyword.control.return`.
//! Tokens carry a path of scope names ordered from the grammar root to the
//! innermost rule.

use std::fmt;
use std::sync::Arc;

/// A hierarchical, dot-separated scope label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeName(Arc<str>);

impl ScopeName {
    /// Create a scope name
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The full dotted name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-separated segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Segment-wise prefix test
    ///
    /// `keyword.control` matches `keyword.control` and
    /// `keyword.control.return`, but not `keyword.controls`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        if prefix.is_empty() {
            return false;
        }
        match self.0.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

impl fmt::Display for ScopeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Selects scope paths, used to decide where injections are active
///
/// Syntax: comma-separated alternatives; each alternative is a
/// space-separated list of scope prefixes that must appear, in order,
/// somewhere in the scope path (`source.c comment` matches any comment
/// nested inside `source.c`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSelector {
    alternatives: Vec<Vec<String>>,
}

impl ScopeSelector {
    /// Parse a selector string
    pub fn parse(source: &str) -> Self {
        let alternatives = source
            .split(',')
            .map(|alt| alt.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|alt| !alt.is_empty())
            .collect();
        Self { alternatives }
    }

    /// Check whether a scope path satisfies any alternative
    pub fn matches(&self, path: &[ScopeName]) -> bool {
        self.alternatives.iter().any(|alt| {
            let mut scopes = path.iter();
            alt.iter()
                .all(|prefix| scopes.by_ref().any(|scope| scope.has_prefix(prefix)))
        })
    }

    /// True if the selector has no alternatives and so matches nothing
    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }
}

impl fmt::Display for ScopeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alternatives: Vec<String> = self.alternatives.iter().map(|alt| alt.join(" ")).collect();
        f.write_str(&alternatives.join(", "))
    }
}
