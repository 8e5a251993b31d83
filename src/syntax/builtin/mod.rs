//! Built-in grammars
//!
//! Grammar documents compiled into the binary: C, C++, the TODO marker
//! overlay for comments and the link overlay for comments and strings.

use super::grammar::Grammar;

const SOURCES: &[(&str, &str)] = &[
    ("c.toml", include_str!("c.toml")),
    ("cpp.toml", include_str!("cpp.toml")),
    ("todo.toml", include_str!("todo.toml")),
    ("hyperlink.toml", include_str!("hyperlink.toml")),
];

/// Get all built-in grammars
pub fn all_grammars() -> Vec<Grammar> {
    SOURCES
        .iter()
        .filter_map(|(file, source)| match Grammar::compile(source) {
            Ok(grammar) => Some(grammar),
            Err(err) => {
                tracing::error!(grammar = file, error = %err, "built-in grammar failed to compile");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::rules::Rule;

    #[test]
    fn test_builtin_grammars_compile() {
        for (file, source) in SOURCES {
            if let Err(err) = Grammar::compile(source) {
                panic!("{file}: {err}");
            }
        }
        let scopes: Vec<String> = all_grammars().iter().map(|g| g.scope_name().to_string()).collect();
        assert_eq!(scopes, vec!["source.c", "source.cpp", "text.todo", "text.hyperlink"]);
    }

    #[test]
    fn test_cpp_defers_to_c() {
        let grammars = all_grammars();
        let cpp = &grammars[1];
        let externals: Vec<_> = cpp.graph().external_includes().map(|(_, grammar, _)| grammar).collect();
        assert_eq!(externals, vec!["source.c"]);
    }

    #[test]
    fn test_overlays_are_injection_only() {
        let grammars = all_grammars();
        assert!(grammars[0].injection_selector().is_none());
        assert!(grammars[1].injection_selector().is_none());
        assert_eq!(grammars[2].injection_selector().unwrap().to_string(), "comment");
        assert_eq!(grammars[3].injection_selector().unwrap().to_string(), "comment, string");
    }

    #[test]
    fn test_hyperlink_pattern() {
        let grammars = all_grammars();
        let graph = grammars[3].graph();
        let Rule::Match(rule) = graph.rule(graph.candidates(graph.root())[0]) else {
            panic!("expected a match rule");
        };
        let line = "see https://example.com/a_b?x=1. or http:";
        let found = rule.pattern.find_at(line, 0).unwrap();
        assert_eq!(&line[found.start..found.end], "https://example.com/a_b?x=1");
        assert!(rule.pattern.find_at(line, found.end).is_none());
        assert!(rule.pattern.find_at("xhttps://a.b", 0).is_none());
    }
}
