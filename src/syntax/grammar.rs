//! Grammar definitions
//!
//! A grammar is described by a TOML document and compiled into a
//! [`Grammar`]: the root scope name, file type hints and a [`RuleGraph`].
//!
//! ```toml
//! name = "C"
//! scope-name = "source.c"
//! file-types = ["c", "h"]
//!
//! [[patterns]]
//! include = "#comment"
//!
//! [repository.comment]
//! name = "comment.block.c"
//! begin = '/\*'
//! end = '\*/'
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use super::pattern::{EndPattern, Pattern};
use super::rules::{
    BeginEndRule, Captures, IncludeTarget, Injection, InjectionSelector, MatchRule, Rule, RuleGraph, RuleId,
};
use super::scope::{ScopeName, ScopeSelector};
use super::tokenizer::{self, TokenizedLine, TokenizerState};
use crate::error::CompileError;

/// Grammar document as written on disk
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GrammarSource {
    pub name: String,
    pub scope_name: String,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub first_line_match: Option<String>,
    /// Makes this grammar an overlay of every grammar it is resolved against
    #[serde(default)]
    pub injection_selector: Option<String>,
    #[serde(default)]
    pub patterns: Vec<RuleSource>,
    #[serde(default)]
    pub repository: BTreeMap<String, RuleSource>,
    #[serde(default)]
    pub injections: Vec<InjectionSource>,
}

/// One rule as written in a grammar document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuleSource {
    pub name: Option<String>,
    pub content_name: Option<String>,
    #[serde(rename = "match")]
    pub match_pattern: Option<String>,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub include: Option<String>,
    #[serde(default)]
    pub captures: BTreeMap<String, CaptureSource>,
    #[serde(default)]
    pub begin_captures: BTreeMap<String, CaptureSource>,
    #[serde(default)]
    pub end_captures: BTreeMap<String, CaptureSource>,
    #[serde(default)]
    pub patterns: Vec<RuleSource>,
    #[serde(default)]
    pub apply_end_pattern_last: bool,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureSource {
    pub name: String,
}

/// Overlay declared inside a grammar
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InjectionSource {
    /// Scope selector; absent or `*` means always active
    pub selector: Option<String>,
    #[serde(default)]
    pub patterns: Vec<RuleSource>,
}

/// A compiled grammar
#[derive(Debug, Clone)]
pub struct Grammar {
    name: String,
    file_types: Vec<String>,
    first_line_match: Option<Pattern>,
    injection_selector: Option<ScopeSelector>,
    graph: RuleGraph,
}

impl Grammar {
    /// Compile a grammar from TOML text
    pub fn compile(source: &str) -> Result<Self, CompileError> {
        let source: GrammarSource = toml::from_str(source)?;
        Self::from_source(&source)
    }

    /// Compile an already-parsed grammar document
    pub fn from_source(source: &GrammarSource) -> Result<Self, CompileError> {
        let graph = Compiler::new(source).compile()?;
        let first_line_match = source
            .first_line_match
            .as_deref()
            .map(|pattern| compile_pattern(pattern, "first-line-match"))
            .transpose()?;
        let injection_selector = source
            .injection_selector
            .as_deref()
            .map(ScopeSelector::parse)
            .filter(|selector| !selector.is_empty());

        tracing::debug!(
            grammar = %source.scope_name,
            rules = graph.len(),
            "compiled grammar"
        );

        Ok(Self {
            name: source.name.clone(),
            file_types: source.file_types.clone(),
            first_line_match,
            injection_selector,
            graph,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope_name(&self) -> &ScopeName {
        self.graph.scope_name()
    }

    pub fn file_types(&self) -> &[String] {
        &self.file_types
    }

    /// Selector under which this grammar injects itself into others
    pub fn injection_selector(&self) -> Option<&ScopeSelector> {
        self.injection_selector.as_ref()
    }

    pub fn graph(&self) -> &RuleGraph {
        &self.graph
    }

    pub(crate) fn with_graph(&self, graph: RuleGraph) -> Self {
        Self {
            graph,
            ..self.clone()
        }
    }

    /// Test the first-line pattern against the start of a document
    pub fn first_line_matches(&self, contents: &str) -> bool {
        let Some(pattern) = &self.first_line_match else {
            return false;
        };
        let first_line = contents.lines().next().unwrap_or_default();
        pattern.find_at(first_line, 0).is_some()
    }

    /// Tokenize one line given the state left by the previous line
    pub fn tokenize_line(&self, previous: &TokenizerState, line: &str) -> TokenizedLine {
        tokenizer::tokenize_line(&self.graph, previous, line)
    }

    /// Tokenize a whole document, one entry per line
    pub fn tokenize_lines(&self, text: &str) -> Vec<TokenizedLine> {
        let mut state = TokenizerState::new();
        text.lines()
            .map(|line| {
                let tokenized = self.tokenize_line(&state, line);
                state = tokenized.end_state.clone();
                tokenized
            })
            .collect()
    }
}

fn compile_pattern(pattern: &str, rule: &str) -> Result<Pattern, CompileError> {
    Pattern::new(pattern).map_err(|err| invalid_pattern(pattern, rule, &err))
}

fn invalid_pattern(pattern: &str, rule: &str, err: &regex::Error) -> CompileError {
    CompileError::InvalidPattern {
        pattern: pattern.to_string(),
        rule: rule.to_string(),
        reason: err.to_string(),
    }
}

/// Builds a [`RuleGraph`] from a grammar document
struct Compiler<'a> {
    source: &'a GrammarSource,
    graph: RuleGraph,
    repository: HashMap<&'a str, RuleId>,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a GrammarSource) -> Self {
        Self {
            source,
            graph: RuleGraph::new(ScopeName::new(&source.scope_name)),
            repository: HashMap::new(),
        }
    }

    fn compile(mut self) -> Result<RuleGraph, CompileError> {
        let source = self.source;

        // Reserve ids first so repository entries can include each other
        // regardless of declaration order.
        for name in source.repository.keys() {
            let id = self.graph.push(Rule::Patterns(Vec::new()));
            self.repository.insert(name.as_str(), id);
            self.graph.name_rule(name, id);
        }

        for (name, rule) in &source.repository {
            let id = self.repository[name.as_str()];
            let compiled = self.compile_body(rule, &format!("#{name}"))?;
            self.graph.replace(id, compiled);
        }

        let root_path = format!("{} (root)", source.scope_name);
        let root_patterns = self.compile_list(&source.patterns, &root_path)?;
        let root = self.graph.root();
        self.graph.replace(root, Rule::Patterns(root_patterns));

        for (index, injection) in source.injections.iter().enumerate() {
            let path = format!("injection {index}");
            let patterns = self.compile_list(&injection.patterns, &path)?;
            let selector = InjectionSelector::parse(injection.selector.as_deref());
            self.graph.add_injection(Injection::new(selector, patterns));
        }

        self.graph.check_cycles()?;
        self.graph.link();
        Ok(self.graph)
    }

    fn compile_list(&mut self, rules: &[RuleSource], path: &str) -> Result<Vec<RuleId>, CompileError> {
        rules
            .iter()
            .enumerate()
            .map(|(index, rule)| -> Result<RuleId, CompileError> {
                let body = self.compile_body(rule, &format!("{path}/patterns[{index}]"))?;
                Ok(self.graph.push(body))
            })
            .collect()
    }

    fn compile_body(&mut self, rule: &RuleSource, path: &str) -> Result<Rule, CompileError> {
        if rule.disabled {
            return Ok(Rule::Patterns(Vec::new()));
        }

        if let Some(include) = &rule.include {
            return self.resolve_include(include, path).map(Rule::Include);
        }

        let scope = rule.name.as_deref().map(ScopeName::new);

        if let Some(pattern) = &rule.match_pattern {
            return Ok(Rule::Match(MatchRule {
                pattern: compile_pattern(pattern, path)?,
                scope,
                captures: compile_captures(&rule.captures, path)?,
            }));
        }

        if let Some(begin) = &rule.begin {
            let end = rule
                .end
                .as_deref()
                .ok_or_else(|| CompileError::MissingEnd { rule: path.to_string() })?;
            let captures_or = |specific: &BTreeMap<String, CaptureSource>| {
                if specific.is_empty() {
                    compile_captures(&rule.captures, path)
                } else {
                    compile_captures(specific, path)
                }
            };
            return Ok(Rule::BeginEnd(BeginEndRule {
                begin: compile_pattern(begin, path)?,
                end: EndPattern::new(end).map_err(|err| invalid_pattern(end, path, &err))?,
                scope,
                content_scope: rule.content_name.as_deref().map(ScopeName::new),
                begin_captures: captures_or(&rule.begin_captures)?,
                end_captures: captures_or(&rule.end_captures)?,
                patterns: self.compile_list(&rule.patterns, path)?,
                apply_end_pattern_last: rule.apply_end_pattern_last,
            }));
        }

        Ok(Rule::Patterns(self.compile_list(&rule.patterns, path)?))
    }

    fn resolve_include(&self, include: &str, path: &str) -> Result<IncludeTarget, CompileError> {
        let own_scope = self.source.scope_name.as_str();
        let (grammar, rule) = match include {
            "$self" => return Ok(IncludeTarget::Rule(self.graph.root())),
            "$base" => return Ok(IncludeTarget::Base),
            _ => match include.split_once('#') {
                Some((grammar, rule)) => (grammar, Some(rule)),
                None => (include, None),
            },
        };

        if !grammar.is_empty() && grammar != own_scope {
            return Ok(IncludeTarget::External {
                grammar: grammar.to_string(),
                rule: rule.map(str::to_string),
            });
        }

        match rule {
            None => Ok(IncludeTarget::Rule(self.graph.root())),
            Some(name) => self
                .repository
                .get(name)
                .map(|id| IncludeTarget::Rule(*id))
                .ok_or_else(|| CompileError::UnresolvedRule {
                    name: name.to_string(),
                    rule: path.to_string(),
                }),
        }
    }
}

fn compile_captures(captures: &BTreeMap<String, CaptureSource>, path: &str) -> Result<Captures, CompileError> {
    let entries = captures
        .iter()
        .map(|(key, capture)| -> Result<(usize, ScopeName), CompileError> {
            let group = key.trim().parse::<usize>().map_err(|_| CompileError::InvalidCapture {
                key: key.clone(),
                rule: path.to_string(),
            })?;
            Ok((group, ScopeName::new(&capture.name)))
        })
        .collect::<Result<Vec<_>, CompileError>>()?;
    Ok(Captures::new(entries))
}
