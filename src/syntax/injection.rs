//! Injection resolution
//!
//! Links cross-grammar includes (`source.other`, `source.other#rule`) by
//! appending the referenced grammar's rule arena to a copy of the host
//! graph, and turns grammars that declare an injection selector into
//! overlays of the host. References to grammars that are not available
//! stay inert, so a grammar still tokenizes its own rules without them.

use std::collections::HashMap;

use super::grammar::Grammar;
use super::rules::{IncludeTarget, Injection, InjectionSelector, Rule, RuleGraph, RuleId};

/// Resolve cross-grammar references of `grammar` against `externals`
///
/// Each external grammar is linked in at most once, however many
/// references point at it. `grammar` itself is left untouched.
pub fn resolve_injections(grammar: &Grammar, externals: &[&Grammar]) -> Grammar {
    let host_scope = grammar.scope_name().as_str();
    let by_scope: HashMap<&str, &Grammar> = externals
        .iter()
        .filter(|external| external.scope_name().as_str() != host_scope)
        .map(|external| (external.scope_name().as_str(), *external))
        .collect();

    let mut graph = grammar.graph().clone();
    let mut linked: HashMap<String, usize> = HashMap::new();

    for external in externals {
        let Some(selector) = external.injection_selector() else {
            continue;
        };
        if external.scope_name().as_str() == host_scope {
            continue;
        }
        let offset = link(&mut graph, &mut linked, external);
        let root = RuleId::new(external.graph().root().index() + offset);
        graph.add_injection(Injection::new(InjectionSelector::Scoped(selector.clone()), vec![root]));
        tracing::debug!(
            host = host_scope,
            injection = %external.scope_name(),
            selector = %selector,
            "added injection grammar"
        );
    }

    // Linking appends rules, which may carry further external includes;
    // keep scanning until the arena stops growing.
    let mut scanned = 0;
    while scanned < graph.len() {
        let pending: Vec<(RuleId, String, Option<String>)> = graph
            .external_includes()
            .filter(|(id, _, _)| id.index() >= scanned)
            .map(|(id, target, rule)| (id, target.to_string(), rule.map(str::to_string)))
            .collect();
        scanned = graph.len();

        for (id, target, rule) in pending {
            if target == host_scope {
                let resolved = match rule.as_deref() {
                    None => Some(graph.root()),
                    Some(name) => graph.repository_rule(name),
                };
                if let Some(resolved) = resolved {
                    graph.replace(id, Rule::Include(IncludeTarget::Rule(resolved)));
                }
                continue;
            }

            let Some(external) = by_scope.get(target.as_str()) else {
                tracing::debug!(host = host_scope, target = %target, "unresolved grammar include left inert");
                continue;
            };
            let offset = link(&mut graph, &mut linked, external);
            let resolved = match rule.as_deref() {
                None => Some(external.graph().root()),
                Some(name) => external.graph().repository_rule(name),
            };
            match resolved {
                Some(target_rule) => {
                    let shifted = RuleId::new(target_rule.index() + offset);
                    graph.replace(id, Rule::Include(IncludeTarget::Rule(shifted)));
                }
                None => tracing::debug!(
                    host = host_scope,
                    target = %target,
                    rule = ?rule,
                    "include of unknown repository rule left inert"
                ),
            }
        }
    }

    graph.link();
    grammar.with_graph(graph)
}

/// Append `external` to `graph` once, returning its id offset
fn link(graph: &mut RuleGraph, linked: &mut HashMap<String, usize>, external: &Grammar) -> usize {
    let scope = external.scope_name().as_str();
    if let Some(offset) = linked.get(scope) {
        return *offset;
    }
    let offset = graph.append(external.graph());
    linked.insert(scope.to_string(), offset);
    offset
}
