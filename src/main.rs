//! scopelex - scope tokenizer for TextMate-style grammars
//!
//! Prints the scoped tokens of a file, checks annotated fixture files and
//! lists the available grammars.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scopelex::config::Config;
use scopelex::error::{Error, Result};
use scopelex::syntax::{check_fixture_with, AssertionSyntax, Grammar, GrammarRegistry};

#[derive(Parser)]
#[command(name = "scopelex", version)]
#[command(about = "Tokenize source files into scoped spans using TextMate-style grammars")]
struct Args {
    /// Configuration file to use instead of ~/.scopelex.conf
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every token of a file with its scopes
    Tokenize {
        /// File to tokenize
        file: PathBuf,
        /// Root scope of the grammar to use instead of detecting it
        #[arg(long)]
        scope: Option<String>,
        /// Additional grammar files to load
        #[arg(long = "grammar", value_name = "TOML")]
        grammars: Vec<PathBuf>,
    },
    /// Check the scope assertions of an annotated file
    Check {
        /// Annotated file
        fixture: PathBuf,
        /// Root scope of the grammar to use instead of detecting it
        #[arg(long)]
        scope: Option<String>,
        /// Additional grammar files to load
        #[arg(long = "grammar", value_name = "TOML")]
        grammars: Vec<PathBuf>,
        /// Comment token that starts assertion lines
        #[arg(long, default_value = "//")]
        comment: String,
        /// Pattern for text closing an assertion comment, e.g. '\s*\*/\s*$'
        #[arg(long, value_name = "REGEX")]
        trailing_comment: Option<String>,
    },
    /// List the registered grammars
    Grammars,
}

fn main() {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    init_logging(&config);

    if let Err(e) = run(args.command, &config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Log to stderr, filtered by RUST_LOG or the configured level
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(command: Command, config: &Config) -> Result<()> {
    let mut registry = GrammarRegistry::from_config(config)?;

    match command {
        Command::Tokenize { file, scope, grammars } => {
            load_grammars(&mut registry, &grammars)?;
            let contents = fs::read_to_string(&file)?;
            let grammar = pick_grammar(&registry, &file, &contents, scope.as_deref())?;
            print_tokens(&registry, &grammar, &contents)
        }
        Command::Check {
            fixture,
            scope,
            grammars,
            comment,
            trailing_comment,
        } => {
            load_grammars(&mut registry, &grammars)?;
            let contents = fs::read_to_string(&fixture)?;
            let grammar = pick_grammar(&registry, &fixture, &contents, scope.as_deref())?;
            let mut syntax = AssertionSyntax::new(&comment)?;
            if let Some(trailing) = &trailing_comment {
                syntax = syntax.with_trailing(trailing)?;
            }
            let report = check_fixture_with(&grammar, &contents, &syntax)?;

            let mut out = io::stdout().lock();
            for failure in &report.failures {
                writeln!(out, "{}: {}", fixture.display(), failure)?;
            }
            if !report.passed() {
                return Err(Error::FixtureFailed(report.failures.len()));
            }
            writeln!(out, "{}: {} assertions passed", fixture.display(), report.assertions)?;
            Ok(())
        }
        Command::Grammars => {
            let mut out = io::stdout().lock();
            for grammar in registry.list_grammars() {
                let kind = match grammar.injection_selector() {
                    Some(selector) => format!("injects into: {}", selector),
                    None => grammar.file_types().join(", "),
                };
                writeln!(out, "{:<16} {:<12} {}", grammar.scope_name().as_str(), grammar.name(), kind)?;
            }
            Ok(())
        }
    }
}

fn load_grammars(registry: &mut GrammarRegistry, paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        registry.load_grammar_file(path)?;
    }
    Ok(())
}

fn pick_grammar(registry: &GrammarRegistry, path: &Path, contents: &str, scope: Option<&str>) -> Result<Arc<Grammar>> {
    match scope {
        Some(scope) => registry
            .grammar_for_scope_name(scope)
            .ok_or_else(|| Error::UnknownGrammar(scope.to_string())),
        None => registry
            .select_grammar(path, contents)
            .ok_or_else(|| Error::NoGrammarForFile(path.to_path_buf())),
    }
}

/// One line per token: `line:start-end "text" scope scope ...`
fn print_tokens(registry: &GrammarRegistry, grammar: &Grammar, contents: &str) -> Result<()> {
    let mut out = io::stdout().lock();
    for (index, (line, tokenized)) in contents.lines().zip(registry.tokenize_text(grammar, contents)).enumerate() {
        for token in &tokenized.tokens {
            let scopes: Vec<&str> = token.scopes.iter().map(|scope| scope.as_str()).collect();
            writeln!(
                out,
                "{}:{}-{} {:?} {}",
                index + 1,
                token.start,
                token.end,
                token.text(line),
                scopes.join(" ")
            )?;
        }
    }
    Ok(())
}
