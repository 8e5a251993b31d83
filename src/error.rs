//! Error types for scopelex

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for scopelex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: {source}")]
    Grammar {
        path: PathBuf,
        #[source]
        source: CompileError,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("No grammar for scope: {0}")]
    UnknownGrammar(String),

    #[error("No grammar matches file: {0}")]
    NoGrammarForFile(PathBuf),

    #[error("Fixture contains no assertions")]
    EmptyFixture,

    #[error("{0} fixture assertion(s) failed")]
    FixtureFailed(usize),
}

/// Errors reported while compiling a grammar definition
///
/// A grammar that fails to compile is rejected as a whole.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Malformed grammar definition: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Include of unknown rule `{name}` in {rule}")]
    UnresolvedRule { name: String, rule: String },

    #[error("Invalid pattern `{pattern}` in {rule}: {reason}")]
    InvalidPattern {
        pattern: String,
        rule: String,
        reason: String,
    },

    #[error("Include cycle through `{rule}` is not broken by a begin/end rule")]
    CyclicInclude { rule: String },

    #[error("Rule {rule} has a begin pattern but no end pattern")]
    MissingEnd { rule: String },

    #[error("Capture key `{key}` in {rule} is not a group number")]
    InvalidCapture { key: String, rule: String },
}
