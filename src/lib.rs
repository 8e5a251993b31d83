//! scopelex - declarative, scope-based tokenization of source text
//!
//! Grammars in the style of TextMate grammars are compiled into rule
//! graphs and driven over text line by line, assigning every span a path
//! of hierarchical scope names such as
//! `source.c meta.block.c keyword.control.return.c`.
//!
//! ```
//! use scopelex::syntax::{Grammar, TokenizerState};
//!
//! let grammar = Grammar::compile(r#"
//! name = "Numbers"
//! scope-name = "source.numbers"
//! [[patterns]]
//! name = "constant.numeric.numbers"
//! match = '\d+'
//! "#).unwrap();
//!
//! let line = grammar.tokenize_line(&TokenizerState::new(), "a 42");
//! assert!(line.token_at(2).unwrap().has_scope("constant.numeric"));
//! ```

pub mod config;
pub mod error;
pub mod syntax;
