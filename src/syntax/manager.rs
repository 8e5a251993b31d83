//! Grammar registry
//!
//! This module provides the GrammarRegistry that holds the loaded
//! grammars, links them to each other, picks a grammar for a file and
//! keeps per-document tokenization caches.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::builtin;
use super::grammar::Grammar;
use super::injection::resolve_injections;
use super::scope::ScopeName;
use super::tokenizer::{tokenize_line_limited, LineLimits, TokenizedLine, TokenizerState};
use crate::config::Config;
use crate::error::{Error, Result};

/// Per-line limits used until configured otherwise
pub const DEFAULT_LINE_LIMITS: LineLimits = LineLimits {
    max_length: Some(1000),
    max_tokens: Some(100),
};

/// Per-document tokenization cache
#[derive(Debug, Default)]
pub struct DocumentCache {
    /// Root scope of the grammar for this document (None if untokenized)
    grammar: Option<ScopeName>,
    /// Tokenized lines from the top of the document; everything past the
    /// end needs recomputation
    lines: Vec<TokenizedLine>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the grammar for this document
    pub fn set_grammar(&mut self, grammar: Option<ScopeName>) {
        self.grammar = grammar;
        self.invalidate_from(0);
    }

    pub fn grammar(&self) -> Option<&ScopeName> {
        self.grammar.as_ref()
    }

    /// Invalidate cached lines from a specific line onwards
    pub fn invalidate_from(&mut self, line: usize) {
        self.lines.truncate(line);
    }

    /// Number of lines currently cached
    pub fn valid_lines(&self) -> usize {
        self.lines.len()
    }
}

struct Entry {
    /// Grammar as compiled, with cross-grammar includes unresolved
    source: Arc<Grammar>,
    /// Grammar linked against every other registered grammar
    resolved: Arc<Grammar>,
}

/// Registry of compiled grammars
pub struct GrammarRegistry {
    /// Registered grammars, in registration order
    grammars: Vec<Entry>,
    /// Extra file types per root scope name
    custom_file_types: HashMap<String, Vec<String>>,
    /// Per-document caches (document id -> cache)
    documents: HashMap<usize, DocumentCache>,
    /// Bounds on the work spent per line
    limits: LineLimits,
}

impl GrammarRegistry {
    /// Create a registry with the built-in grammars
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for grammar in builtin::all_grammars() {
            registry.insert(grammar);
        }
        registry.resolve_all();
        registry
    }

    /// Create a registry without any grammars
    pub fn empty() -> Self {
        Self {
            grammars: Vec::new(),
            custom_file_types: HashMap::new(),
            documents: HashMap::new(),
            limits: DEFAULT_LINE_LIMITS,
        }
    }

    /// Create a registry as described by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = if config.builtin_grammars {
            Self::new()
        } else {
            Self::empty()
        };
        for dir in &config.grammar_paths {
            registry.load_grammar_dir(dir)?;
        }
        for (scope, types) in &config.file_types {
            registry.set_custom_file_types(scope, types.clone());
        }
        registry.set_max_line_length(config.max_line_length);
        registry.set_max_tokens_per_line(config.max_tokens_per_line);
        Ok(registry)
    }

    /// Register a grammar, replacing any grammar with the same root scope
    pub fn add_grammar(&mut self, grammar: Grammar) -> Arc<Grammar> {
        let index = self.insert(grammar);
        self.resolve_all();
        Arc::clone(&self.grammars[index].resolved)
    }

    /// Compile and register a grammar file
    pub fn load_grammar_file(&mut self, path: &Path) -> Result<Arc<Grammar>> {
        let contents = fs::read_to_string(path)?;
        let grammar = Grammar::compile(&contents).map_err(|source| Error::Grammar {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), grammar = %grammar.scope_name(), "loaded grammar file");
        Ok(self.add_grammar(grammar))
    }

    /// Register every `*.toml` grammar in a directory
    ///
    /// Grammars that fail to compile are skipped. Returns the root scopes
    /// of the grammars that were loaded.
    pub fn load_grammar_dir(&mut self, dir: &Path) -> Result<Vec<ScopeName>> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut loaded = Vec::new();
        for path in paths {
            let contents = fs::read_to_string(&path)?;
            match Grammar::compile(&contents) {
                Ok(grammar) => {
                    loaded.push(grammar.scope_name().clone());
                    self.insert(grammar);
                }
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping grammar"),
            }
        }
        self.resolve_all();
        tracing::debug!(dir = %dir.display(), count = loaded.len(), "loaded grammar directory");
        Ok(loaded)
    }

    /// Get a grammar by root scope name
    pub fn grammar_for_scope_name(&self, scope: &str) -> Option<Arc<Grammar>> {
        self.grammars
            .iter()
            .find(|entry| entry.source.scope_name().as_str() == scope)
            .map(|entry| Arc::clone(&entry.resolved))
    }

    /// List registered grammars in registration order
    pub fn list_grammars(&self) -> Vec<Arc<Grammar>> {
        self.grammars.iter().map(|entry| Arc::clone(&entry.resolved)).collect()
    }

    /// Add file types for a grammar on top of the ones it declares
    pub fn set_custom_file_types(&mut self, scope: &str, types: Vec<String>) {
        self.custom_file_types.insert(scope.to_string(), types);
    }

    /// Limit how much of each line is tokenized; `0` means unlimited
    pub fn set_max_line_length(&mut self, limit: usize) {
        self.limits.max_length = (limit > 0).then_some(limit);
        self.invalidate_documents();
    }

    /// Limit how many tokens are matched per line; `0` means unlimited
    pub fn set_max_tokens_per_line(&mut self, limit: usize) {
        self.limits.max_tokens = (limit > 0).then_some(limit);
        self.invalidate_documents();
    }

    pub fn line_limits(&self) -> LineLimits {
        self.limits
    }

    fn invalidate_documents(&mut self) {
        for cache in self.documents.values_mut() {
            cache.invalidate_from(0);
        }
    }

    /// Pick the best grammar for a file
    ///
    /// Returns `None` when no grammar matches the path or the first line.
    pub fn select_grammar(&self, path: &Path, contents: &str) -> Option<Arc<Grammar>> {
        let mut best: Option<(&Entry, f64)> = None;
        for entry in &self.grammars {
            if entry.source.injection_selector().is_some() {
                continue;
            }
            let score = self.grammar_score(&entry.source, path, contents);
            if score > 0.0 && best.map_or(true, |(_, high)| score > high) {
                best = Some((entry, score));
            }
        }
        best.map(|(entry, score)| {
            tracing::debug!(path = %path.display(), grammar = %entry.source.scope_name(), score, "selected grammar");
            Arc::clone(&entry.resolved)
        })
    }

    fn grammar_score(&self, grammar: &Grammar, path: &Path, contents: &str) -> f64 {
        let mut score = self.path_score(grammar, path);
        if grammar.first_line_matches(contents) {
            score += 0.5;
        }
        score
    }

    /// Length of the longest file type matching the end of `path`
    fn path_score(&self, grammar: &Grammar, path: &Path) -> f64 {
        let path = path.to_string_lossy().replace('\\', "/").to_lowercase();
        let components: Vec<&str> = path.split(['/', '.']).collect();

        let declared = grammar.file_types().len();
        let custom = self
            .custom_file_types
            .get(grammar.scope_name().as_str())
            .map_or(&[][..], Vec::as_slice);

        let mut score = 0.0;
        for (index, file_type) in grammar.file_types().iter().chain(custom).enumerate() {
            let file_type = file_type.to_lowercase();
            let wanted: Vec<&str> = file_type.split(['/', '.']).collect();
            if !components.ends_with(&wanted) {
                continue;
            }
            score = f64::max(score, file_type.len() as f64);
            if index >= declared {
                score += 0.5;
            }
        }
        score
    }

    /// Get or create the cache for a document
    pub fn document(&mut self, doc: usize) -> &mut DocumentCache {
        self.documents.entry(doc).or_default()
    }

    /// Remove the cache for a document (when it is closed)
    pub fn remove_document(&mut self, doc: usize) {
        self.documents.remove(&doc);
    }

    /// Set the grammar of a document by root scope name
    pub fn set_document_grammar(&mut self, doc: usize, scope: Option<&str>) -> Result<()> {
        let scope = match scope {
            Some(scope) => Some(
                self.grammar_for_scope_name(scope)
                    .map(|grammar| grammar.scope_name().clone())
                    .ok_or_else(|| Error::UnknownGrammar(scope.to_string()))?,
            ),
            None => None,
        };
        self.document(doc).set_grammar(scope);
        Ok(())
    }

    /// Invalidate a document's cache from a line onwards
    pub fn invalidate_from(&mut self, doc: usize, line: usize) {
        if let Some(cache) = self.documents.get_mut(&doc) {
            cache.invalidate_from(line);
        }
    }

    /// Tokenize a single line of a document, using the cache if available
    ///
    /// Lines before `line_idx` that are not cached yet are tokenized first
    /// to obtain the starting state. Returns `None` if the document has no
    /// grammar or the line does not exist.
    pub fn tokenize_document_line(&mut self, doc: usize, line_idx: usize, lines: &[&str]) -> Option<TokenizedLine> {
        if line_idx >= lines.len() {
            return None;
        }
        let scope = self.documents.get(&doc)?.grammar.clone()?;
        let grammar = self.resolved(&scope)?;
        let limits = self.limits;

        let cache = self.documents.get_mut(&doc)?;
        while cache.lines.len() <= line_idx {
            let index = cache.lines.len();
            let previous = cache.lines.last().map(|line| line.end_state.clone()).unwrap_or_default();
            let tokenized = tokenize_line_limited(grammar.graph(), &previous, lines[index], limits);
            cache.lines.push(tokenized);
        }
        cache.lines.get(line_idx).cloned()
    }

    /// Tokenize a whole text with a grammar, honouring the line limits
    pub fn tokenize_text(&self, grammar: &Grammar, text: &str) -> Vec<TokenizedLine> {
        let mut state = TokenizerState::new();
        text.lines()
            .map(|line| {
                let tokenized = tokenize_line_limited(grammar.graph(), &state, line, self.limits);
                state = tokenized.end_state.clone();
                tokenized
            })
            .collect()
    }

    fn resolved(&self, scope: &ScopeName) -> Option<Arc<Grammar>> {
        self.grammar_for_scope_name(scope.as_str())
    }

    /// Store a grammar without re-linking, returning its position
    fn insert(&mut self, grammar: Grammar) -> usize {
        let grammar = Arc::new(grammar);
        let entry = Entry {
            source: Arc::clone(&grammar),
            resolved: grammar,
        };
        match self
            .grammars
            .iter()
            .position(|existing| existing.source.scope_name() == entry.source.scope_name())
        {
            Some(index) => {
                tracing::debug!(grammar = %entry.source.scope_name(), "replacing grammar");
                self.grammars[index] = entry;
                index
            }
            None => {
                self.grammars.push(entry);
                self.grammars.len() - 1
            }
        }
    }

    /// Re-link every grammar against all others
    fn resolve_all(&mut self) {
        let sources: Vec<Arc<Grammar>> = self.grammars.iter().map(|entry| Arc::clone(&entry.source)).collect();
        let externals: Vec<&Grammar> = sources.iter().map(Arc::as_ref).collect();
        for entry in &mut self.grammars {
            entry.resolved = Arc::new(resolve_injections(&entry.source, &externals));
        }
        self.invalidate_documents();
    }
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SHELL: &str = r#"
name = "Shell"
scope-name = "source.shell"
file-types = ["sh", "bashrc"]
first-line-match = '^#!.*\b(?:ba)?sh\b'
[[patterns]]
name = "comment.line.number-sign.shell"
match = '#.*$'
"#;

    const MAKE: &str = r#"
name = "Makefile"
scope-name = "source.makefile"
file-types = ["Makefile", "mk", "make.inc"]
[[patterns]]
name = "comment.line.number-sign.makefile"
match = '#.*$'
"#;

    const BLOCK: &str = r#"
name = "Block"
scope-name = "source.block"
file-types = ["blk"]
[[patterns]]
name = "comment.block.block"
begin = '/\*'
end = '\*/'
"#;

    fn registry() -> GrammarRegistry {
        let mut registry = GrammarRegistry::empty();
        for source in [SHELL, MAKE, BLOCK] {
            registry.add_grammar(Grammar::compile(source).unwrap());
        }
        registry
    }

    fn selected(registry: &GrammarRegistry, path: &str, contents: &str) -> Option<String> {
        registry
            .select_grammar(Path::new(path), contents)
            .map(|grammar| grammar.scope_name().to_string())
    }

    #[test]
    fn test_builtin_grammars() {
        let registry = GrammarRegistry::new();
        assert!(registry.grammar_for_scope_name("source.c").is_some());
        assert!(registry.grammar_for_scope_name("source.cpp").is_some());
        assert!(registry.grammar_for_scope_name("text.todo").is_some());
        assert!(registry.grammar_for_scope_name("text.hyperlink").is_some());
        assert_eq!(selected(&registry, "main.c", ""), Some("source.c".to_string()));
        assert_eq!(selected(&registry, "main.cpp", ""), Some("source.cpp".to_string()));
    }

    #[test]
    fn test_select_by_path() {
        let registry = registry();
        assert_eq!(selected(&registry, "/tmp/script.sh", ""), Some("source.shell".to_string()));
        assert_eq!(selected(&registry, "src/Makefile", ""), Some("source.makefile".to_string()));
        assert_eq!(selected(&registry, "/home/me/.bashrc", ""), Some("source.shell".to_string()));
        assert_eq!(selected(&registry, "no_extension", ""), None);
    }

    #[test]
    fn test_select_is_case_insensitive() {
        let registry = registry();
        assert_eq!(selected(&registry, "SCRIPT.SH", ""), Some("source.shell".to_string()));
        assert_eq!(selected(&registry, "makefile", ""), Some("source.makefile".to_string()));
    }

    #[test]
    fn test_longest_file_type_wins() {
        let mut registry = registry();
        registry.add_grammar(
            Grammar::compile(
                r#"
name = "Include"
scope-name = "source.inc"
file-types = ["inc"]
"#,
            )
            .unwrap(),
        );
        assert_eq!(selected(&registry, "rules.make.inc", ""), Some("source.makefile".to_string()));
        assert_eq!(selected(&registry, "rules.inc", ""), Some("source.inc".to_string()));
    }

    #[test]
    fn test_select_by_first_line() {
        let registry = registry();
        assert_eq!(
            selected(&registry, "run", "#!/bin/bash\necho hi"),
            Some("source.shell".to_string())
        );
    }

    #[test]
    fn test_custom_file_types() {
        let mut registry = registry();
        assert_eq!(selected(&registry, "notes.blk2", ""), None);
        registry.set_custom_file_types("source.block", vec!["blk2".to_string()]);
        assert_eq!(selected(&registry, "notes.blk2", ""), Some("source.block".to_string()));

        // Same length, but the custom type scores higher
        registry.set_custom_file_types("source.block", vec!["sh".to_string()]);
        assert_eq!(selected(&registry, "x.sh", ""), Some("source.block".to_string()));
    }

    #[test]
    fn test_injection_grammar_never_selected() {
        let mut registry = GrammarRegistry::empty();
        registry.add_grammar(
            Grammar::compile(
                r#"
name = "Marker"
scope-name = "text.marker"
file-types = ["txt"]
injection-selector = "comment"
"#,
            )
            .unwrap(),
        );
        assert_eq!(selected(&registry, "notes.txt", ""), None);
    }

    #[test]
    fn test_add_grammar_replaces_same_scope() {
        let mut registry = registry();
        let count = registry.list_grammars().len();
        registry.add_grammar(Grammar::compile(SHELL).unwrap());
        assert_eq!(registry.list_grammars().len(), count);
    }

    #[test]
    fn test_document_cache() {
        let mut registry = registry();
        registry.set_document_grammar(0, Some("source.block")).unwrap();

        let lines = ["a /* b", "c", "d */ e"];
        let last = registry.tokenize_document_line(0, 2, &lines).unwrap();
        assert!(last.token_at(0).unwrap().has_scope("comment.block"));
        assert!(last.end_state.is_normal());
        assert_eq!(registry.document(0).valid_lines(), 3);

        // Closing the comment on line 0 changes line 2
        registry.invalidate_from(0, 0);
        assert_eq!(registry.document(0).valid_lines(), 0);
        let lines = ["a /* b */", "c", "d */ e"];
        let last = registry.tokenize_document_line(0, 2, &lines).unwrap();
        assert!(!last.token_at(0).unwrap().has_scope("comment.block"));
    }

    #[test]
    fn test_document_without_grammar() {
        let mut registry = registry();
        assert!(registry.tokenize_document_line(1, 0, &["text"]).is_none());
        registry.set_document_grammar(1, Some("source.block")).unwrap();
        assert!(registry.tokenize_document_line(1, 5, &["text"]).is_none());
        registry.remove_document(1);
        assert!(registry.tokenize_document_line(1, 0, &["text"]).is_none());
    }

    #[test]
    fn test_unknown_document_grammar() {
        let mut registry = registry();
        let err = registry.set_document_grammar(0, Some("source.nope")).unwrap_err();
        assert!(matches!(err, Error::UnknownGrammar(_)));
    }

    #[test]
    fn test_max_line_length() {
        let mut registry = registry();
        registry.set_max_line_length(4);
        let grammar = registry.grammar_for_scope_name("source.block").unwrap();
        let lines = registry.tokenize_text(&grammar, "abcdef /* x */");
        assert!(lines[0].tokens.iter().all(|token| !token.has_scope("comment.block")));
        assert_eq!(lines[0].tokens.last().unwrap().end, 14);
    }

    #[test]
    fn test_default_line_limits() {
        let mut registry = registry();
        assert_eq!(registry.line_limits(), DEFAULT_LINE_LIMITS);

        let grammar = registry.grammar_for_scope_name("source.block").unwrap();
        let line = format!("{}/* x */", "a".repeat(1000));
        let lines = registry.tokenize_text(&grammar, &line);
        assert!(lines[0].tokens.iter().all(|token| !token.has_scope("comment.block")));

        registry.set_max_line_length(0);
        registry.set_max_tokens_per_line(0);
        assert_eq!(registry.line_limits(), LineLimits::UNLIMITED);
        let lines = registry.tokenize_text(&grammar, &line);
        assert!(lines[0].tokens.last().unwrap().has_scope("comment.block"));
    }

    #[test]
    fn test_max_tokens_per_line() {
        let mut registry = registry();
        registry.set_max_tokens_per_line(2);
        let grammar = registry.grammar_for_scope_name("source.block").unwrap();
        let lines = registry.tokenize_text(&grammar, "/* a */ b /* c */");
        let last = lines[0].tokens.last().unwrap();
        assert_eq!((last.start, last.end), (7, 17));
        assert!(!last.has_scope("comment.block"));
    }

    #[test]
    fn test_load_grammar_dir() {
        let dir = std::env::temp_dir().join(format!("scopelex-grammars-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("shell.toml"), SHELL).unwrap();
        fs::write(dir.join("broken.toml"), "name = ").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let mut registry = GrammarRegistry::empty();
        let loaded = registry.load_grammar_dir(&dir).unwrap();
        assert_eq!(loaded, vec![ScopeName::new("source.shell")]);

        let err = registry.load_grammar_file(&dir.join("broken.toml")).unwrap_err();
        assert!(matches!(err, Error::Grammar { ref path, .. } if *path == PathBuf::from(dir.join("broken.toml"))));

        fs::remove_dir_all(&dir).unwrap();
    }
}
