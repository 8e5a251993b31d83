//! Rule graph for grammar-driven tokenization
//!
//! Rules live in an arena and refer to each other by [`RuleId`]. Include
//! references are resolved to ids when a grammar is compiled, and every
//! container (the grammar root and each begin/end rule) gets a flattened
//! candidate list so the tokenizer never follows includes at run time.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::pattern::{EndPattern, MatchResult, Pattern};
use super::scope::{ScopeName, ScopeSelector};
use crate::error::CompileError;

/// Index of a rule in its graph's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(usize);

impl RuleId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position in the arena
    pub fn index(self) -> usize {
        self.0
    }

    fn offset(self, by: usize) -> Self {
        Self(self.0 + by)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scope names assigned to capture groups, sorted by group index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures(Vec<(usize, ScopeName)>);

impl Captures {
    pub const EMPTY: Captures = Captures(Vec::new());

    pub fn new(mut entries: Vec<(usize, ScopeName)>) -> Self {
        entries.sort_by_key(|(group, _)| *group);
        Self(entries)
    }

    /// Scope assigned to a capture group
    pub fn get(&self, group: usize) -> Option<&ScopeName> {
        self.0.iter().find(|(g, _)| *g == group).map(|(_, scope)| scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pair each participating, non-empty capture of `found` with its scope
    ///
    /// Ordered by start offset, outer spans before the spans they contain.
    /// Group order only breaks exact ties: a repeated group can end up
    /// after a higher-numbered one in the text.
    pub fn spans(&self, found: &MatchResult) -> Vec<(std::ops::Range<usize>, ScopeName)> {
        let mut spans: Vec<_> = self
            .0
            .iter()
            .filter_map(|(group, scope)| {
                let range = found.capture(*group)?;
                (!range.is_empty()).then(|| (range, scope.clone()))
            })
            .collect();
        spans.sort_by_key(|(range, _)| (range.start, Reverse(range.end)));
        spans
    }
}

/// Single-pattern rule
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub pattern: Pattern,
    pub scope: Option<ScopeName>,
    pub captures: Captures,
}

/// Rule spanning from a begin match to an end match, possibly across lines
#[derive(Debug, Clone)]
pub struct BeginEndRule {
    pub begin: Pattern,
    pub end: EndPattern,
    /// Scope for the whole construct, delimiters included
    pub scope: Option<ScopeName>,
    /// Scope for the text between the delimiters only
    pub content_scope: Option<ScopeName>,
    pub begin_captures: Captures,
    pub end_captures: Captures,
    pub patterns: Vec<RuleId>,
    /// Let nested rules win over the end pattern at the same offset
    pub apply_end_pattern_last: bool,
}

/// Target of an include rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeTarget {
    /// A rule in the same arena
    Rule(RuleId),
    /// The root of the grammar being tokenized (`$base`)
    Base,
    /// A grammar not yet linked in; inert until resolved
    External { grammar: String, rule: Option<String> },
}

/// A node of the rule graph
#[derive(Debug, Clone)]
pub enum Rule {
    Match(MatchRule),
    BeginEnd(BeginEndRule),
    Include(IncludeTarget),
    /// Plain list of rules (repository entries, the grammar root)
    Patterns(Vec<RuleId>),
}

impl Rule {
    /// Ids this rule refers to without crossing a begin/end boundary
    fn include_edges(&self, root: RuleId) -> Vec<RuleId> {
        match self {
            Rule::Patterns(children) => children.clone(),
            Rule::Include(IncludeTarget::Rule(target)) => vec![*target],
            Rule::Include(IncludeTarget::Base) => vec![root],
            _ => Vec::new(),
        }
    }

    fn is_composite(&self) -> bool {
        matches!(self, Rule::Patterns(_) | Rule::Include(_))
    }

    fn shifted(&self, by: usize) -> Self {
        let shift = |ids: &[RuleId]| -> Vec<RuleId> { ids.iter().map(|id| id.offset(by)).collect() };
        match self {
            Rule::Patterns(children) => Rule::Patterns(shift(children)),
            Rule::Include(IncludeTarget::Rule(target)) => Rule::Include(IncludeTarget::Rule(target.offset(by))),
            Rule::BeginEnd(rule) => Rule::BeginEnd(BeginEndRule {
                patterns: shift(&rule.patterns),
                ..rule.clone()
            }),
            other => other.clone(),
        }
    }
}

/// Where an injection overlay is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionSelector {
    /// Active at every position
    Always,
    /// Active where the current scope path matches
    Scoped(ScopeSelector),
}

impl InjectionSelector {
    pub fn parse(source: Option<&str>) -> Self {
        match source.map(str::trim) {
            None | Some("") | Some("*") => Self::Always,
            Some(selector) => Self::Scoped(ScopeSelector::parse(selector)),
        }
    }

    pub fn matches(&self, path: &[ScopeName]) -> bool {
        match self {
            Self::Always => true,
            Self::Scoped(selector) => selector.matches(path),
        }
    }
}

/// Overlay patterns tried at every position where the selector matches
#[derive(Debug, Clone)]
pub struct Injection {
    pub selector: InjectionSelector,
    pub patterns: Vec<RuleId>,
    candidates: Vec<RuleId>,
}

impl Injection {
    pub fn new(selector: InjectionSelector, patterns: Vec<RuleId>) -> Self {
        Self {
            selector,
            patterns,
            candidates: Vec::new(),
        }
    }

    /// Flattened match and begin/end rules of this overlay
    pub fn candidates(&self) -> &[RuleId] {
        &self.candidates
    }
}

/// Compiled, immutable rule arena of one grammar
#[derive(Debug, Clone)]
pub struct RuleGraph {
    scope_name: ScopeName,
    rules: Vec<Rule>,
    root: RuleId,
    repository: HashMap<String, RuleId>,
    injections: Vec<Injection>,
    /// Flattened candidates per rule id; empty for non-containers
    candidates: Vec<Vec<RuleId>>,
}

impl RuleGraph {
    pub(crate) fn new(scope_name: ScopeName) -> Self {
        Self {
            scope_name,
            rules: vec![Rule::Patterns(Vec::new())],
            root: RuleId(0),
            repository: HashMap::new(),
            injections: Vec::new(),
            candidates: Vec::new(),
        }
    }

    /// Scope name every token of this grammar starts with
    pub fn scope_name(&self) -> &ScopeName {
        &self.scope_name
    }

    pub fn root(&self) -> RuleId {
        self.root
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Look up a named repository rule
    pub fn repository_rule(&self, name: &str) -> Option<RuleId> {
        self.repository.get(name).copied()
    }

    pub fn injections(&self) -> &[Injection] {
        &self.injections
    }

    /// Rules the tokenizer tries inside `container`, in declaration order
    pub fn candidates(&self, container: RuleId) -> &[RuleId] {
        self.candidates.get(container.0).map_or(&[], Vec::as_slice)
    }

    /// Whether nested rules take priority over the end pattern of `id`
    pub fn applies_end_pattern_last(&self, id: RuleId) -> bool {
        matches!(self.rule(id), Rule::BeginEnd(rule) if rule.apply_end_pattern_last)
    }

    /// Include references that point outside this graph and are still inert
    pub fn external_includes(&self) -> impl Iterator<Item = (RuleId, &str, Option<&str>)> {
        self.rules.iter().enumerate().filter_map(|(index, rule)| match rule {
            Rule::Include(IncludeTarget::External { grammar, rule }) => {
                Some((RuleId(index), grammar.as_str(), rule.as_deref()))
            }
            _ => None,
        })
    }

    pub(crate) fn push(&mut self, rule: Rule) -> RuleId {
        self.rules.push(rule);
        RuleId(self.rules.len() - 1)
    }

    pub(crate) fn replace(&mut self, id: RuleId, rule: Rule) {
        self.rules[id.0] = rule;
    }

    pub(crate) fn name_rule(&mut self, name: &str, id: RuleId) {
        self.repository.insert(name.to_string(), id);
    }

    pub(crate) fn add_injection(&mut self, injection: Injection) {
        self.injections.push(injection);
    }

    /// Append another graph's arena, returning the id offset of its rules
    pub(crate) fn append(&mut self, other: &RuleGraph) -> usize {
        let offset = self.rules.len();
        self.rules.extend(other.rules.iter().map(|rule| rule.shifted(offset)));
        offset
    }

    /// Human-readable label for error messages
    pub(crate) fn describe(&self, id: RuleId) -> String {
        if id == self.root {
            return format!("{} (root)", self.scope_name);
        }
        self.repository
            .iter()
            .find(|(_, rule)| **rule == id)
            .map_or_else(|| format!("rule {id}"), |(name, _)| format!("#{name}"))
    }

    /// Reject include cycles that never pass through a begin/end rule
    ///
    /// Such a cycle would make the candidate list of a container infinite.
    pub(crate) fn check_cycles(&self) -> Result<(), CompileError> {
        const UNVISITED: u8 = 0;
        const ACTIVE: u8 = 1;
        const DONE: u8 = 2;

        let mut marks = vec![UNVISITED; self.rules.len()];
        for start in 0..self.rules.len() {
            if marks[start] != UNVISITED || !self.rules[start].is_composite() {
                continue;
            }
            marks[start] = ACTIVE;
            let mut stack = vec![(start, 0usize)];
            while let Some(&(node, next)) = stack.last() {
                let edges = self.rules[node].include_edges(self.root);
                let Some(child) = edges.get(next).map(|id| id.0) else {
                    marks[node] = DONE;
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if !self.rules[child].is_composite() {
                    continue;
                }
                match marks[child] {
                    UNVISITED => {
                        marks[child] = ACTIVE;
                        stack.push((child, 0));
                    }
                    ACTIVE => {
                        return Err(CompileError::CyclicInclude {
                            rule: self.describe(RuleId(child)),
                        })
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Recompute flattened candidate lists for every container
    pub(crate) fn link(&mut self) {
        let mut candidates = vec![Vec::new(); self.rules.len()];
        candidates[self.root.0] = self.flatten(&[self.root]);
        for (index, rule) in self.rules.iter().enumerate() {
            if let Rule::BeginEnd(rule) = rule {
                candidates[index] = self.flatten(&rule.patterns);
            }
        }
        let injections: Vec<Vec<RuleId>> = self
            .injections
            .iter()
            .map(|injection| self.flatten(&injection.patterns))
            .collect();
        for (injection, flattened) in self.injections.iter_mut().zip(injections) {
            injection.candidates = flattened;
        }
        self.candidates = candidates;
    }

    /// Expand includes and pattern lists into match and begin/end rules,
    /// keeping the first occurrence of each
    fn flatten(&self, roots: &[RuleId]) -> Vec<RuleId> {
        let mut out = Vec::new();
        let mut emitted = HashSet::new();
        let mut expanded = HashSet::new();
        let mut stack: Vec<RuleId> = roots.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            match &self.rules[id.0] {
                Rule::Match(_) | Rule::BeginEnd(_) => {
                    if emitted.insert(id) {
                        out.push(id);
                    }
                }
                Rule::Patterns(children) => {
                    if expanded.insert(id) {
                        stack.extend(children.iter().rev());
                    }
                }
                Rule::Include(IncludeTarget::Rule(target)) => {
                    if expanded.insert(id) {
                        stack.push(*target);
                    }
                }
                Rule::Include(IncludeTarget::Base) => {
                    if expanded.insert(id) {
                        stack.push(self.root);
                    }
                }
                Rule::Include(IncludeTarget::External { .. }) => {}
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_rule(pattern: &str, scope: &str) -> Rule {
        Rule::Match(MatchRule {
            pattern: Pattern::new(pattern).unwrap(),
            scope: Some(ScopeName::new(scope)),
            captures: Captures::default(),
        })
    }

    fn begin_end(begin: &str, end: &str, patterns: Vec<RuleId>) -> Rule {
        Rule::BeginEnd(BeginEndRule {
            begin: Pattern::new(begin).unwrap(),
            end: EndPattern::new(end).unwrap(),
            scope: None,
            content_scope: None,
            begin_captures: Captures::default(),
            end_captures: Captures::default(),
            patterns,
            apply_end_pattern_last: false,
        })
    }

    #[test]
    fn test_flatten_follows_includes_in_order() {
        let mut graph = RuleGraph::new(ScopeName::new("source.test"));
        let a = graph.push(match_rule("a", "a"));
        let b = graph.push(match_rule("b", "b"));
        let group = graph.push(Rule::Patterns(vec![b, a]));
        let include = graph.push(Rule::Include(IncludeTarget::Rule(group)));
        graph.replace(graph.root(), Rule::Patterns(vec![a, include]));
        graph.link();

        // `a` appears once, at its first position
        assert_eq!(graph.candidates(graph.root()), &[a, b]);
    }

    #[test]
    fn test_recursive_begin_end_is_legal() {
        let mut graph = RuleGraph::new(ScopeName::new("source.test"));
        let parens = graph.push(begin_end(r"\(", r"\)", Vec::new()));
        let include_self = graph.push(Rule::Include(IncludeTarget::Rule(parens)));
        graph.replace(parens, begin_end(r"\(", r"\)", vec![include_self]));
        graph.replace(graph.root(), Rule::Patterns(vec![parens]));

        assert!(graph.check_cycles().is_ok());
        graph.link();
        assert_eq!(graph.candidates(parens), &[parens]);
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let mut graph = RuleGraph::new(ScopeName::new("source.test"));
        let first = graph.push(Rule::Patterns(Vec::new()));
        let second = graph.push(Rule::Include(IncludeTarget::Rule(first)));
        graph.replace(first, Rule::Patterns(vec![second]));
        graph.name_rule("first", first);
        graph.replace(graph.root(), Rule::Patterns(vec![first]));

        let err = graph.check_cycles().unwrap_err();
        assert!(matches!(err, CompileError::CyclicInclude { .. }));
    }

    #[test]
    fn test_external_include_is_inert() {
        let mut graph = RuleGraph::new(ScopeName::new("source.test"));
        let a = graph.push(match_rule("a", "a"));
        let external = graph.push(Rule::Include(IncludeTarget::External {
            grammar: "source.other".to_string(),
            rule: None,
        }));
        graph.replace(graph.root(), Rule::Patterns(vec![external, a]));
        graph.link();

        assert_eq!(graph.candidates(graph.root()), &[a]);
        let externals: Vec<_> = graph.external_includes().collect();
        assert_eq!(externals, vec![(external, "source.other", None)]);
    }

    #[test]
    fn test_append_offsets_ids() {
        let mut host = RuleGraph::new(ScopeName::new("source.host"));
        let mut guest = RuleGraph::new(ScopeName::new("source.guest"));
        let x = guest.push(match_rule("x", "x"));
        guest.replace(guest.root(), Rule::Patterns(vec![x]));

        let offset = host.append(&guest);
        assert_eq!(offset, 1);
        match host.rule(RuleId::new(offset)) {
            Rule::Patterns(children) => assert_eq!(children, &[RuleId::new(x.index() + offset)]),
            other => panic!("unexpected rule {other:?}"),
        }
    }

    #[test]
    fn test_captures_spans_follow_text_order() {
        // The repeated group leaves `(b)` before `(a)` in the text
        let pattern = Pattern::new(r"(?:(a)|(b))+").unwrap();
        let found = pattern.find_at("ba", 0).unwrap();
        let captures = Captures::new(vec![(1, ScopeName::new("a")), (2, ScopeName::new("b"))]);
        assert_eq!(
            captures.spans(&found),
            vec![(0..1, ScopeName::new("b")), (1..2, ScopeName::new("a"))]
        );

        let pattern = Pattern::new(r"((x)y)").unwrap();
        let found = pattern.find_at("xy", 0).unwrap();
        let captures = Captures::new(vec![(2, ScopeName::new("inner")), (1, ScopeName::new("outer"))]);
        assert_eq!(
            captures.spans(&found),
            vec![(0..2, ScopeName::new("outer")), (0..1, ScopeName::new("inner"))]
        );
    }

    #[test]
    fn test_captures_spans_skip_missing_groups() {
        let pattern = Pattern::new(r"(a)(b)?(c)").unwrap();
        let found = pattern.find_at("ac", 0).unwrap();
        let captures = Captures::new(vec![
            (3, ScopeName::new("third")),
            (1, ScopeName::new("first")),
            (2, ScopeName::new("second")),
        ]);
        let spans = captures.spans(&found);
        assert_eq!(
            spans,
            vec![(0..1, ScopeName::new("first")), (1..2, ScopeName::new("third"))]
        );
    }
}
