//! Pattern matching for grammar rules
//!
//! Patterns wrap compiled regexes and search a line from a given
//! position. Compiled regexes are shared through a process-wide cache
//! keyed by pattern source; grammars are immutable, so entries are never
//! evicted.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

static PATTERN_CACHE: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(Default::default);

/// Compile a regex, reusing a cached copy if the same source was seen before
fn compile_regex(source: &str) -> Result<Regex, regex::Error> {
    if let Some(regex) = PATTERN_CACHE.read().get(source) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(source)?;
    PATTERN_CACHE
        .write()
        .entry(source.to_string())
        .or_insert_with(|| regex.clone());
    Ok(regex)
}

/// Number of distinct pattern sources compiled so far in this process
pub fn cached_pattern_count() -> usize {
    PATTERN_CACHE.read().len()
}

/// A successful pattern match within a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Byte offset where the match starts (inclusive)
    pub start: usize,
    /// Byte offset where the match ends (exclusive)
    pub end: usize,
    /// Capture group spans by group index; index 0 is the whole match
    pub captures: Vec<Option<Range<usize>>>,
}

impl MatchResult {
    /// Span of a capture group, if it participated in the match
    pub fn capture(&self, index: usize) -> Option<Range<usize>> {
        self.captures.get(index).cloned().flatten()
    }

    /// Text of a capture group
    pub fn capture_text<'a>(&self, text: &'a str, index: usize) -> Option<&'a str> {
        self.capture(index).and_then(|range| text.get(range))
    }

    /// Zero-width match
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A compiled matcher for one rule pattern
#[derive(Clone)]
pub struct Pattern {
    source: Arc<str>,
    regex: Regex,
    /// Pattern began with `\G`: only matches at the search position
    anchored: bool,
}

impl Pattern {
    /// Compile a pattern
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Self::build(source, compile_regex)
    }

    /// Compile a pattern without going through the shared cache
    ///
    /// For patterns built from document text, which would otherwise fill
    /// the cache without bound.
    pub fn uncached(source: &str) -> Result<Self, regex::Error> {
        Self::build(source, Regex::new)
    }

    fn build(source: &str, compile: impl Fn(&str) -> Result<Regex, regex::Error>) -> Result<Self, regex::Error> {
        let (anchored, body) = match source.strip_prefix(r"\G") {
            Some(rest) => (true, rest),
            None => (false, source),
        };
        let regex = compile(body)?;
        Ok(Self {
            source: Arc::from(source),
            regex,
            anchored,
        })
    }

    /// The pattern source as written in the grammar
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Find the first match in `text` starting at or after `position`
    ///
    /// Anchors (`^`, `\b`) see the whole line, not just the suffix.
    pub fn find_at(&self, text: &str, position: usize) -> Option<MatchResult> {
        if position > text.len() || !text.is_char_boundary(position) {
            return None;
        }
        let caps = self.regex.captures_at(text, position)?;
        let whole = caps.get(0)?;
        if self.anchored && whole.start() != position {
            return None;
        }
        Some(MatchResult {
            start: whole.start(),
            end: whole.end(),
            captures: caps.iter().map(|m| m.map(|m| m.range())).collect(),
        })
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

/// End pattern of a begin/end rule
///
/// End patterns may refer back to begin captures with `\1`..`\9`
/// (heredoc-style delimiters). Those are compiled per begin match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndPattern {
    Static(Pattern),
    BackReferenced(Arc<str>),
}

impl EndPattern {
    /// Compile an end pattern, validating back-referencing sources with a
    /// placeholder substituted for each reference
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        if has_back_references(source) {
            let sample = substitute_back_references(source, |_| Some("(?:x)".to_string()));
            Regex::new(sample.trim_start_matches(r"\G"))?;
            Ok(Self::BackReferenced(Arc::from(source)))
        } else {
            Pattern::new(source).map(Self::Static)
        }
    }

    /// The pattern source as written in the grammar
    pub fn source(&self) -> &str {
        match self {
            Self::Static(pattern) => pattern.source(),
            Self::BackReferenced(source) => source,
        }
    }

    /// Produce the concrete end pattern for a begin match on `text`
    ///
    /// Back-referenced patterns are compiled per match and never cached.
    pub fn resolve(&self, text: &str, begin: &MatchResult) -> Option<Pattern> {
        match self {
            Self::Static(pattern) => Some(pattern.clone()),
            Self::BackReferenced(source) => {
                let resolved = substitute_back_references(source, |group| {
                    begin.capture_text(text, group).map(regex::escape)
                });
                match Pattern::uncached(&resolved) {
                    Ok(pattern) => Some(pattern),
                    Err(err) => {
                        tracing::warn!(pattern = %source, error = %err, "unusable back-referenced end pattern");
                        None
                    }
                }
            }
        }
    }
}

fn has_back_references(source: &str) -> bool {
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                if ('1'..='9').contains(&next) {
                    return true;
                }
            }
        }
    }
    false
}

/// Replace each `\N` with `replacement(N)`; unmatched groups become empty
fn substitute_back_references(source: &str, replacement: impl Fn(usize) -> Option<String>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(digit @ '1'..='9') => {
                let group = digit as usize - '0' as usize;
                out.push_str(&replacement(group).unwrap_or_default());
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
