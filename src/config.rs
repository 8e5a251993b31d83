//! Configuration file support
//!
//! Loads settings from ~/.scopelex.conf (or %USERPROFILE%\.scopelex.conf on Windows)
//!
//! Format: simple key=value pairs, one per line
//! Lines starting with # are comments
//!
//! Example:
//! ```text
//! # scopelex configuration
//! grammar-path = ~/grammars, /usr/share/scopelex/grammars
//! builtin-grammars = true
//! max-line-length = 4000
//! max-tokens-per-line = 200
//! log-level = debug
//! file-types.source.cpp = ino, pde
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix of per-grammar file type keys
const FILE_TYPES_PREFIX: &str = "file-types.";

/// Configuration settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Directories searched for `*.toml` grammars
    pub grammar_paths: Vec<PathBuf>,
    /// Whether the built-in grammars are registered
    pub builtin_grammars: bool,
    /// Tokenize at most this many bytes per line (0 = unlimited)
    pub max_line_length: usize,
    /// Stop matching a line after this many tokens (0 = unlimited)
    pub max_tokens_per_line: usize,
    /// Log filter directive used when RUST_LOG is not set
    pub log_level: String,
    /// Extra file types per grammar root scope
    pub file_types: HashMap<String, Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grammar_paths: Vec::new(),
            builtin_grammars: true,
            max_line_length: 1000,
            max_tokens_per_line: 100,
            log_level: "warn".to_string(),
            file_types: HashMap::new(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".scopelex.conf"))
    }

    /// Load configuration from the default file
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Config::default(),
        }
    }

    /// Load configuration from a specific file, falling back to defaults
    /// when it cannot be read
    pub fn load_from(path: &Path) -> Self {
        let mut config = Config::default();

        match fs::read_to_string(path) {
            Ok(contents) => {
                let settings = Self::parse(&contents);
                config.apply(&settings);
            }
            Err(err) => tracing::debug!(path = %path.display(), error = %err, "no configuration loaded"),
        }

        config
    }

    /// Parse config file contents into key-value pairs
    fn parse(contents: &str) -> HashMap<String, String> {
        let mut settings = HashMap::new();

        for line in contents.lines() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Parse key = value
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_lowercase();
                let value = value.trim().to_string();
                settings.insert(key, value);
            }
        }

        settings
    }

    /// Apply settings from parsed config
    fn apply(&mut self, settings: &HashMap<String, String>) {
        if let Some(value) = settings.get("grammar-path") {
            self.grammar_paths = split_list(value).map(expand_home).collect();
        }

        if let Some(value) = settings.get("builtin-grammars") {
            self.builtin_grammars = parse_bool(value);
        }

        if let Some(value) = settings.get("max-line-length") {
            if let Ok(n) = value.parse::<usize>() {
                self.max_line_length = n;
            }
        }

        if let Some(value) = settings.get("max-tokens-per-line") {
            if let Ok(n) = value.parse::<usize>() {
                self.max_tokens_per_line = n;
            }
        }

        if let Some(value) = settings.get("log-level") {
            if !value.is_empty() {
                self.log_level = value.clone();
            }
        }

        for (key, value) in settings {
            if let Some(scope) = key.strip_prefix(FILE_TYPES_PREFIX) {
                if !scope.is_empty() {
                    let types = split_list(value).map(str::to_string).collect();
                    self.file_types.insert(scope.to_string(), types);
                }
            }
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }

    #[cfg(not(windows))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
        _ => PathBuf::from(path),
    }
}

/// Split a comma-separated value, dropping empty items
fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// Parse a boolean value from string
fn parse_bool(s: &str) -> bool {
    let s = s.to_lowercase();
    matches!(s.as_str(), "true" | "yes" | "on" | "1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let contents = r#"
# Comment
grammar-path = /opt/grammars, ./local
builtin-grammars = false
max-line-length = 4000
Log-Level = debug
file-types.source.cpp = ino, pde
        "#;

        let settings = Config::parse(contents);
        assert_eq!(settings.get("grammar-path"), Some(&"/opt/grammars, ./local".to_string()));
        assert_eq!(settings.get("builtin-grammars"), Some(&"false".to_string()));
        assert_eq!(settings.get("max-line-length"), Some(&"4000".to_string()));
        assert_eq!(settings.get("log-level"), Some(&"debug".to_string()));
        assert_eq!(settings.get("file-types.source.cpp"), Some(&"ino, pde".to_string()));
    }

    #[test]
    fn test_apply_settings() {
        let mut config = Config::default();
        let mut settings = HashMap::new();
        settings.insert("grammar-path".to_string(), "/opt/grammars, ./local,".to_string());
        settings.insert("builtin-grammars".to_string(), "no".to_string());
        settings.insert("max-line-length".to_string(), "120".to_string());
        settings.insert("max-tokens-per-line".to_string(), "0".to_string());
        settings.insert("log-level".to_string(), "scopelex=trace".to_string());
        settings.insert("file-types.source.c".to_string(), "pc, ec".to_string());

        config.apply(&settings);

        assert_eq!(config.grammar_paths, vec![PathBuf::from("/opt/grammars"), PathBuf::from("./local")]);
        assert!(!config.builtin_grammars);
        assert_eq!(config.max_line_length, 120);
        assert_eq!(config.max_tokens_per_line, 0);
        assert_eq!(config.log_level, "scopelex=trace");
        assert_eq!(config.file_types.get("source.c"), Some(&vec!["pc".to_string(), "ec".to_string()]));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let mut config = Config::default();
        let mut settings = HashMap::new();
        settings.insert("max-line-length".to_string(), "lots".to_string());
        settings.insert("max-tokens-per-line".to_string(), "-1".to_string());
        settings.insert("log-level".to_string(), String::new());
        settings.insert("file-types.".to_string(), "x".to_string());

        config.apply(&settings);

        assert_eq!(config.max_line_length, 1000);
        assert_eq!(config.max_tokens_per_line, 100);
        assert_eq!(config.log_level, "warn");
        assert!(config.file_types.is_empty());
        assert!(config.builtin_grammars);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load_from(Path::new("/nonexistent/scopelex.conf"));
        assert!(config.builtin_grammars);
        assert!(config.grammar_paths.is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("True"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(parse_bool("1"));

        assert!(!parse_bool("false"));
        assert!(!parse_bool("no"));
        assert!(!parse_bool("off"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("anything"));
    }
}
