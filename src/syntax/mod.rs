//! Grammar-driven tokenization
//!
//! This module provides the tokenizer and the infrastructure around it:
//! - Grammar compilation into rule graphs
//! - Line tokenization with state carried between lines
//! - Cross-grammar includes and injection overlays
//! - Grammar selection and per-document caching
//! - Scope assertions in annotated fixture files

mod builtin;
mod fixture;
mod grammar;
mod injection;
mod manager;
mod pattern;
mod rules;
mod scope;
mod tokenizer;

pub use fixture::{
    check_fixture, check_fixture_with, parse_assertions, Assertion, AssertionSyntax, FixtureFailure, FixtureReport,
};
pub use grammar::{CaptureSource, Grammar, GrammarSource, InjectionSource, RuleSource};
pub use injection::resolve_injections;
pub use manager::{DocumentCache, GrammarRegistry, DEFAULT_LINE_LIMITS};
pub use pattern::{cached_pattern_count, EndPattern, MatchResult, Pattern};
pub use rules::{
    BeginEndRule, Captures, IncludeTarget, Injection, InjectionSelector, MatchRule, Rule, RuleGraph, RuleId,
};
pub use scope::{ScopeName, ScopeSelector};
pub use tokenizer::{tokenize_line, tokenize_line_limited, LineLimits, Token, TokenizedLine, TokenizerState};
