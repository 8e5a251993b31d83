//! Scope assertions embedded in annotated source files
//!
//! A fixture is an ordinary source file with assertion comments under the
//! lines they describe:
//!
//! ```c
//! int table[4];
//! // <- support.storage.type.builtin
//!   //^ variable.other.declaration.c
//!       // ^ !keyword.operator
//! ```
//!
//! `<-` asserts the column of the comment token itself, a run of carets
//! asserts every caret column. The target is the closest line above that
//! is not an assertion. A `!` prefix negates the assertion.
//!
//! Languages whose comments need closing (`/* ^ scope */`) set a trailing
//! pattern on [`AssertionSyntax`]; the matched text is dropped before the
//! scopes are read.

use std::fmt;

use regex::Regex;

use super::grammar::Grammar;
use super::scope::ScopeName;
use crate::error::{CompileError, Error, Result};

/// One expected (or forbidden) scope at one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// Line the assertion is about (0-based)
    pub line: usize,
    /// Byte column on that line
    pub column: usize,
    pub scope: String,
    pub negated: bool,
    /// Line the assertion is written on (0-based)
    pub assertion_line: usize,
}

impl Assertion {
    /// Check the assertion against the scope path at its position
    pub fn holds(&self, scopes: &[ScopeName]) -> bool {
        let found = scopes.iter().any(|scope| scope.has_prefix(&self.scope));
        found != self.negated
    }
}

/// A failed assertion and the scopes actually found
#[derive(Debug, Clone)]
pub struct FixtureFailure {
    pub assertion: Assertion,
    pub actual: Vec<ScopeName>,
}

impl fmt::Display for FixtureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let assertion = &self.assertion;
        let actual: Vec<&str> = self.actual.iter().map(ScopeName::as_str).collect();
        if assertion.negated {
            write!(f, "expected not to find scope `{}`", assertion.scope)?;
        } else {
            write!(f, "expected to find scope `{}`", assertion.scope)?;
        }
        write!(
            f,
            " at {}:{}, found [{}] (assertion on line {})",
            assertion.line + 1,
            assertion.column + 1,
            actual.join(", "),
            assertion.assertion_line + 1
        )
    }
}

/// Outcome of checking a fixture
#[derive(Debug, Clone, Default)]
pub struct FixtureReport {
    pub assertions: usize,
    pub failures: Vec<FixtureFailure>,
}

impl FixtureReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// How assertion comments are written in a fixture
#[derive(Debug, Clone)]
pub struct AssertionSyntax {
    assertion: Regex,
    trailing: Option<Regex>,
}

impl AssertionSyntax {
    /// Assertions opened by `comment_token` (e.g. `//`)
    pub fn new(comment_token: &str) -> Result<Self> {
        let pattern = format!(r"^(\s*){}\s*(<-|\^+)\s+(\S.*)$", regex::escape(comment_token));
        Ok(AssertionSyntax {
            assertion: assertion_regex(&pattern)?,
            trailing: None,
        })
    }

    /// Drop text matching `pattern` (e.g. `\s*\*/\s*$`) from assertion lines
    pub fn with_trailing(mut self, pattern: &str) -> Result<Self> {
        self.trailing = Some(assertion_regex(pattern)?);
        Ok(self)
    }

    fn captures<'a>(&self, line: &'a str) -> Option<regex::Captures<'a>> {
        let mut line = line.trim_end();
        if let Some(found) = self.trailing.as_ref().and_then(|trailing| trailing.find(line)) {
            line = &line[..found.start()];
        }
        self.assertion.captures(line)
    }
}

fn assertion_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|err| {
        Error::Compile(CompileError::InvalidPattern {
            pattern: pattern.to_string(),
            rule: "fixture assertion".to_string(),
            reason: err.to_string(),
        })
    })
}

/// Tokenize `text` with `grammar` and check every assertion in it
///
/// Assertion lines are recognised by `comment_token` (e.g. `//`) and must
/// themselves tokenize as comments.
pub fn check_fixture(grammar: &Grammar, text: &str, comment_token: &str) -> Result<FixtureReport> {
    check_fixture_with(grammar, text, &AssertionSyntax::new(comment_token)?)
}

/// [`check_fixture`] with a custom assertion syntax
pub fn check_fixture_with(grammar: &Grammar, text: &str, syntax: &AssertionSyntax) -> Result<FixtureReport> {
    let lines: Vec<&str> = text.lines().collect();
    let tokenized = grammar.tokenize_lines(text);
    let assertions = parse_assertions(&lines, syntax, |index| {
        tokenized.get(index).is_some_and(|line| line.is_comment(lines[index]))
    });
    if assertions.is_empty() {
        return Err(Error::EmptyFixture);
    }

    let mut report = FixtureReport {
        assertions: assertions.len(),
        failures: Vec::new(),
    };
    for assertion in assertions {
        let scopes = tokenized
            .get(assertion.line)
            .map(|line| line.scopes_at(assertion.column).to_vec())
            .unwrap_or_default();
        if !assertion.holds(&scopes) {
            report.failures.push(FixtureFailure {
                assertion,
                actual: scopes,
            });
        }
    }

    tracing::debug!(
        grammar = %grammar.scope_name(),
        assertions = report.assertions,
        failures = report.failures.len(),
        "checked fixture"
    );
    Ok(report)
}

/// Extract assertions from fixture lines
///
/// `is_comment` tells whether a line tokenizes as a comment; lines that
/// look like assertions but are not comments are treated as code.
pub fn parse_assertions(lines: &[&str], syntax: &AssertionSyntax, is_comment: impl Fn(usize) -> bool) -> Vec<Assertion> {
    let mut assertions = Vec::new();
    let mut target = 0;
    for (index, line) in lines.iter().enumerate() {
        let caps = match syntax.captures(line) {
            Some(caps) if is_comment(index) => caps,
            _ => {
                target = index;
                continue;
            }
        };
        let (Some(indent), Some(marker), Some(expected)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            target = index;
            continue;
        };

        let columns: Vec<usize> = if marker.as_str() == "<-" {
            vec![indent.end()]
        } else {
            marker.range().collect()
        };
        let target_line = lines.get(target).copied().unwrap_or_default();

        for column in columns {
            let column = translate_column(line, column, target_line);
            for scope in expected.as_str().split_whitespace() {
                let (negated, scope) = match scope.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, scope),
                };
                assertions.push(Assertion {
                    line: target,
                    column,
                    scope: scope.to_string(),
                    negated,
                    assertion_line: index,
                });
            }
        }
    }
    assertions
}

/// Map a byte column of the assertion line to the byte column of the
/// same character position on the target line
fn translate_column(assertion_line: &str, column: usize, target_line: &str) -> usize {
    let chars = assertion_line.get(..column).map_or(column, |prefix| prefix.chars().count());
    target_line
        .char_indices()
        .nth(chars)
        .map_or(target_line.len() + chars.saturating_sub(target_line.chars().count()), |(byte, _)| byte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GRAMMAR: &str = r##"
name = "Fixture"
scope-name = "source.fixture"

[[patterns]]
name = "comment.line.double-slash.fixture"
begin = '//'
end = '$'
begin-captures = { "0" = { name = "punctuation.definition.comment.fixture" } }

[[patterns]]
name = "comment.block.fixture"
begin = '/\*'
end = '\*/'

[[patterns]]
name = "keyword.control.fixture"
match = '\bif\b'

[[patterns]]
name = "constant.numeric.fixture"
match = '\d+'
"##;

    fn all_comments(_: usize) -> bool {
        true
    }

    fn slashes() -> AssertionSyntax {
        AssertionSyntax::new("//").unwrap()
    }

    #[test]
    fn test_parse_arrow_and_carets() {
        let lines = ["if    42", "// <- keyword.control", "   // ^^ constant.numeric !keyword"];
        let assertions = parse_assertions(&lines, &slashes(), |index| index > 0);
        assert_eq!(assertions.len(), 5);
        assert_eq!(
            assertions[0],
            Assertion {
                line: 0,
                column: 0,
                scope: "keyword.control".to_string(),
                negated: false,
                assertion_line: 1,
            }
        );
        let columns: Vec<(usize, &str, bool)> = assertions[1..]
            .iter()
            .map(|a| (a.column, a.scope.as_str(), a.negated))
            .collect();
        assert_eq!(
            columns,
            vec![
                (6, "constant.numeric", false),
                (6, "keyword", true),
                (7, "constant.numeric", false),
                (7, "keyword", true),
            ]
        );
    }

    #[test]
    fn test_plain_comments_become_targets() {
        let lines = ["if", "// just a comment", "// <- comment.line"];
        let assertions = parse_assertions(&lines, &slashes(), all_comments);
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].line, 1);
    }

    #[test]
    fn test_non_comment_lines_are_not_assertions() {
        let lines = ["// <- keyword"];
        let assertions = parse_assertions(&lines, &slashes(), |_| false);
        assert!(assertions.is_empty());
    }

    #[test]
    fn test_check_fixture() {
        let grammar = Grammar::compile(GRAMMAR).unwrap();
        let text = "if 42\n// <- keyword.control.fixture\n// ^^ constant.numeric\n// comment\n// <- punctuation.definition.comment\n";
        let report = check_fixture(&grammar, text, "//").unwrap();
        assert_eq!(report.assertions, 4);
        assert!(report.passed(), "{:?}", report.failures);
    }

    #[test]
    fn test_check_fixture_reports_failures() {
        let grammar = Grammar::compile(GRAMMAR).unwrap();
        let text = "if    42\n   // ^ keyword.control\n// <- !keyword.control\n";
        let report = check_fixture(&grammar, text, "//").unwrap();
        assert_eq!(report.assertions, 2);
        assert_eq!(report.failures.len(), 2);

        let message = report.failures[0].to_string();
        assert!(message.contains("expected to find scope `keyword.control` at 1:7"));
        assert!(message.contains("constant.numeric.fixture"));
        assert!(report.failures[1].to_string().starts_with("expected not to find"));
    }

    #[test]
    fn test_prefix_is_segment_wise() {
        let grammar = Grammar::compile(GRAMMAR).unwrap();
        let report = check_fixture(&grammar, "if\n// <- keyword.cont\n", "//").unwrap();
        assert!(!report.passed());
    }

    #[test]
    fn test_empty_fixture() {
        let grammar = Grammar::compile(GRAMMAR).unwrap();
        let err = check_fixture(&grammar, "if 1\n// nothing here\n", "//").unwrap_err();
        assert!(matches!(err, Error::EmptyFixture));
    }

    #[test]
    fn test_trailing_comment_close() {
        let grammar = Grammar::compile(GRAMMAR).unwrap();
        let text = "if    42\n/*    ^^ constant.numeric */\n/* <- keyword.control */\n";

        let syntax = AssertionSyntax::new("/*").unwrap().with_trailing(r"\s*\*/\s*$").unwrap();
        let report = check_fixture_with(&grammar, text, &syntax).unwrap();
        assert_eq!(report.assertions, 3);
        assert!(report.passed(), "{:?}", report.failures);

        let report = check_fixture(&grammar, text, "/*").unwrap();
        assert_eq!(report.assertions, 6);
        let missing: Vec<&str> = report.failures.iter().map(|f| f.assertion.scope.as_str()).collect();
        assert_eq!(missing, vec!["*/", "*/", "*/"]);
    }

    #[test]
    fn test_invalid_trailing_pattern() {
        let err = AssertionSyntax::new("/*").unwrap().with_trailing("(").unwrap_err();
        assert!(matches!(err, Error::Compile(CompileError::InvalidPattern { .. })));
    }

    #[test]
    fn test_translate_column_counts_characters() {
        assert_eq!(translate_column("// ^", 3, "aé = 1"), 4);
        assert_eq!(translate_column("// ^", 3, "ab"), 3);
    }
}
