//! Line tokenizer
//!
//! Drives a [`RuleGraph`] over one line of text at a time. The state left
//! at the end of a line (the stack of open begin/end rules) is handed to
//! the next line, so constructs such as block comments resume correctly.
//!
//! Every call is total: unmatched text is emitted with the enclosing scope
//! path, and zero-width matches that would not advance force a one
//! character step.

use super::pattern::{MatchResult, Pattern};
use super::rules::{Captures, Rule, RuleGraph, RuleId};
use super::scope::ScopeName;

/// A span of a line and the scopes active over it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte offset where this token starts (inclusive)
    pub start: usize,
    /// Byte offset where this token ends (exclusive)
    pub end: usize,
    /// Scope names from the grammar root to the innermost rule
    pub scopes: Vec<ScopeName>,
}

impl Token {
    /// Length of this token in bytes
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Check if this token contains a byte position
    pub fn contains(&self, pos: usize) -> bool {
        pos >= self.start && pos < self.end
    }

    /// The text of this token within its line
    pub fn text<'a>(&self, line: &'a str) -> &'a str {
        line.get(self.start..self.end).unwrap_or_default()
    }

    /// Check if any scope of this token has `prefix` as a segment prefix
    pub fn has_scope(&self, prefix: &str) -> bool {
        self.scopes.iter().any(|scope| scope.has_prefix(prefix))
    }

    pub fn innermost_scope(&self) -> Option<&ScopeName> {
        self.scopes.last()
    }
}

/// A begin/end rule that is open at some point of the document
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    rule: RuleId,
    scope: Option<ScopeName>,
    content_scope: Option<ScopeName>,
    /// End pattern with back-references substituted; `None` never closes
    end: Option<Pattern>,
    /// Offset the rule was entered at, on the line that opened it
    entered_at: Option<usize>,
}

/// State carried from the end of one line to the start of the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenizerState {
    frames: Vec<Frame>,
}

impl TokenizerState {
    /// State at the start of a document
    pub fn new() -> Self {
        Self::default()
    }

    /// Not inside any begin/end rule
    pub fn is_normal(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of open begin/end rules
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open begin/end rules, outermost first
    pub fn open_rules(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.frames.iter().map(|frame| frame.rule)
    }

    /// Scope path active at this point for a graph
    pub fn scopes(&self, graph: &RuleGraph) -> Vec<ScopeName> {
        let mut scopes = vec![graph.scope_name().clone()];
        for frame in &self.frames {
            scopes.extend(frame.scope.iter().cloned());
            scopes.extend(frame.content_scope.iter().cloned());
        }
        scopes
    }

    fn settle(&mut self) {
        for frame in &mut self.frames {
            frame.entered_at = None;
        }
    }
}

/// Result of tokenizing a single line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedLine {
    /// Contiguous tokens covering the whole line
    pub tokens: Vec<Token>,
    /// State at end of line (for next line)
    pub end_state: TokenizerState,
}

impl TokenizedLine {
    /// Token covering a byte column, or the last token for columns past
    /// the end of the line
    pub fn token_at(&self, column: usize) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|token| token.contains(column))
            .or_else(|| self.tokens.last().filter(|token| column >= token.end))
    }

    /// Scope path at a byte column
    pub fn scopes_at(&self, column: usize) -> &[ScopeName] {
        self.token_at(column).map_or(&[], |token| token.scopes.as_slice())
    }

    /// Whether the first non-whitespace text of the line is a comment
    pub fn is_comment(&self, line: &str) -> bool {
        self.tokens
            .iter()
            .find(|token| !token.text(line).trim().is_empty())
            .is_some_and(|token| token.scopes.iter().any(|scope| scope.segments().any(|s| s == "comment")))
    }
}

/// Bounds on the work spent on one line
///
/// Whatever is left when a limit is hit becomes a single token with the
/// scopes active at that point. Open rules still carry to the next line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineLimits {
    /// Match rules against at most this many bytes
    pub max_length: Option<usize>,
    /// Stop matching once this many tokens have been produced
    pub max_tokens: Option<usize>,
}

impl LineLimits {
    pub const UNLIMITED: LineLimits = LineLimits {
        max_length: None,
        max_tokens: None,
    };
}

/// Tokenize one line
///
/// Pure: the same graph, state and text always give the same result.
pub fn tokenize_line(graph: &RuleGraph, previous: &TokenizerState, line: &str) -> TokenizedLine {
    tokenize_line_limited(graph, previous, line, LineLimits::UNLIMITED)
}

/// Tokenize one line within `limits`
pub fn tokenize_line_limited(
    graph: &RuleGraph,
    previous: &TokenizerState,
    line: &str,
    limits: LineLimits,
) -> TokenizedLine {
    let cut = match limits.max_length {
        Some(limit) if limit < line.len() => floor_char_boundary(line, limit),
        _ => line.len(),
    };

    let mut state = previous.clone();
    state.settle();
    let mut tokens = TokenAccumulator::default();
    LineTokenizer {
        graph,
        text: &line[..cut],
        state: &mut state,
        tokens: &mut tokens,
        max_tokens: limits.max_tokens,
    }
    .run();

    let scopes = state.scopes(graph);
    tokens.produce(line.len(), &scopes);
    state.settle();

    TokenizedLine {
        tokens: tokens.tokens,
        end_state: state,
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn next_char_boundary(text: &str, index: usize) -> usize {
    text[index..]
        .chars()
        .next()
        .map_or(text.len(), |c| index + c.len_utf8())
}

/// Collects tokens so that they stay contiguous and non-empty
#[derive(Debug, Default)]
struct TokenAccumulator {
    tokens: Vec<Token>,
    /// Start of the next token to be produced
    last_end: usize,
}

impl TokenAccumulator {
    fn produce(&mut self, end: usize, scopes: &[ScopeName]) {
        if end <= self.last_end {
            return;
        }
        self.tokens.push(Token {
            start: self.last_end,
            end,
            scopes: scopes.to_vec(),
        });
        self.last_end = end;
    }

    /// Emit a match whose capture groups carry their own scopes
    ///
    /// Captures nest: a group inside another group gets both scopes.
    fn produce_captures(&mut self, scopes: &[ScopeName], found: &MatchResult, captures: &Captures) {
        let mut path = scopes.to_vec();
        // End offsets of the capture scopes currently on `path`
        let mut open: Vec<usize> = Vec::new();

        for (range, scope) in captures.spans(found) {
            if range.start < self.last_end {
                continue;
            }
            while open.last().is_some_and(|end| *end <= range.start) {
                if let Some(end) = open.pop() {
                    self.produce(end, &path);
                    path.pop();
                }
            }
            self.produce(range.start, &path);
            path.push(scope);
            open.push(range.end);
        }
        while let Some(end) = open.pop() {
            self.produce(end, &path);
            path.pop();
        }
        self.produce(found.end, scopes);
    }
}

/// What won the search at a position
#[derive(Debug)]
enum Winner {
    /// End pattern of the innermost open rule
    End,
    Rule(RuleId),
}

#[derive(Debug)]
struct Found {
    winner: Winner,
    result: MatchResult,
}

struct LineTokenizer<'a> {
    graph: &'a RuleGraph,
    text: &'a str,
    state: &'a mut TokenizerState,
    tokens: &'a mut TokenAccumulator,
    max_tokens: Option<usize>,
}

impl LineTokenizer<'_> {
    fn run(&mut self) {
        let mut scopes = self.state.scopes(self.graph);
        let mut pos = 0;

        while !self.token_limit_reached() {
            let Some(found) = self.find_next(&scopes, pos) else {
                break;
            };
            self.tokens.produce(found.result.start, &scopes);
            let start = found.result.start;

            match found.winner {
                Winner::End => {
                    let Some(frame) = self.state.frames.pop() else {
                        break;
                    };
                    if frame.content_scope.is_some() {
                        scopes.pop();
                    }
                    let end_captures = match self.graph.rule(frame.rule) {
                        Rule::BeginEnd(rule) => &rule.end_captures,
                        _ => &EMPTY_CAPTURES,
                    };
                    self.tokens.produce_captures(&scopes, &found.result, end_captures);
                    if frame.scope.is_some() {
                        scopes.pop();
                    }
                    // Pushed and popped without consuming anything
                    if found.result.is_empty() && frame.entered_at == Some(start) {
                        match self.step(start, &scopes) {
                            Some(next) => pos = next,
                            None => break,
                        }
                        continue;
                    }
                }
                Winner::Rule(id) => match self.graph.rule(id) {
                    Rule::Match(rule) if !found.result.is_empty() => {
                        let mut path = scopes.clone();
                        path.extend(rule.scope.iter().cloned());
                        self.tokens.produce_captures(&path, &found.result, &rule.captures);
                    }
                    Rule::BeginEnd(rule) if !self.reenters(id, &found.result) => {
                        let mut path = scopes.clone();
                        path.extend(rule.scope.iter().cloned());
                        self.tokens.produce_captures(&path, &found.result, &rule.begin_captures);
                        path.extend(rule.content_scope.iter().cloned());
                        scopes = path;
                        self.state.frames.push(Frame {
                            rule: id,
                            scope: rule.scope.clone(),
                            content_scope: rule.content_scope.clone(),
                            end: rule.end.resolve(self.text, &found.result),
                            entered_at: Some(start),
                        });
                    }
                    _ => {
                        match self.step(start, &scopes) {
                            Some(next) => pos = next,
                            None => break,
                        }
                        continue;
                    }
                },
            }
            pos = found.result.end;
        }

        self.tokens.produce(self.text.len(), &scopes);
    }

    fn token_limit_reached(&self) -> bool {
        self.max_tokens.is_some_and(|max| self.tokens.tokens.len() >= max)
    }

    /// Advance one character as plain text, `None` at end of line
    fn step(&mut self, pos: usize, scopes: &[ScopeName]) -> Option<usize> {
        if pos >= self.text.len() {
            return None;
        }
        let next = next_char_boundary(self.text, pos);
        self.tokens.produce(next, scopes);
        Some(next)
    }

    /// A zero-width begin of a rule already entered at the same offset
    fn reenters(&self, id: RuleId, found: &MatchResult) -> bool {
        found.is_empty()
            && self
                .state
                .frames
                .iter()
                .any(|frame| frame.rule == id && frame.entered_at == Some(found.start))
    }

    /// Pick the winning candidate at or after `pos`
    ///
    /// Earliest start wins; at equal starts the innermost end pattern
    /// beats nested rules unless the rule applies its end pattern last,
    /// and nested rules go by declaration order. Injection overlays only
    /// win with a strictly earlier start.
    fn find_next(&self, scopes: &[ScopeName], pos: usize) -> Option<Found> {
        let top = self.state.frames.last();
        let end_match = top
            .and_then(|frame| frame.end.as_ref())
            .and_then(|end| end.find_at(self.text, pos))
            .map(|result| Found {
                winner: Winner::End,
                result,
            });

        if pos >= self.text.len() {
            // Only a zero-width end (`$`) can still apply
            return end_match;
        }

        let container = top.map_or(self.graph.root(), |frame| frame.rule);
        let nested = self.best_candidate(self.graph.candidates(container), pos);
        let end_last = top.is_some_and(|frame| self.graph.applies_end_pattern_last(frame.rule));

        let mut best = match (nested, end_match) {
            (None, None) => None,
            (Some(nested), None) => Some(nested),
            (None, Some(end)) => Some(end),
            (Some(nested), Some(end)) => {
                let end_first = end.result.start < nested.result.start
                    || (end.result.start == nested.result.start && !end_last);
                Some(if end_first { end } else { nested })
            }
        };

        for injection in self.graph.injections() {
            if !injection.selector.matches(scopes) {
                continue;
            }
            if let Some(found) = self.best_candidate(injection.candidates(), pos) {
                if best.as_ref().map_or(true, |b| found.result.start < b.result.start) {
                    best = Some(found);
                }
            }
        }

        best
    }

    fn best_candidate(&self, candidates: &[RuleId], pos: usize) -> Option<Found> {
        let mut best: Option<Found> = None;
        for &id in candidates {
            let pattern = match self.graph.rule(id) {
                Rule::Match(rule) => &rule.pattern,
                Rule::BeginEnd(rule) => &rule.begin,
                _ => continue,
            };
            let Some(result) = pattern.find_at(self.text, pos) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| result.start < b.result.start) {
                let at_pos = result.start == pos;
                best = Some(Found {
                    winner: Winner::Rule(id),
                    result,
                });
                if at_pos {
                    break;
                }
            }
        }
        best
    }
}

static EMPTY_CAPTURES: Captures = Captures::EMPTY;
