//! Scope canonicalization: splits `resource:name:actions`,
//! sorts/dedupes/collapses actions, merges scopes that share a
//! `resource:name` prefix, and sorts the final list.

use std::collections::HashMap;

/// Canonicalizes a list of textual scopes. A scope with no recognizable `resource:name:actions`
/// shape is preserved verbatim in the output.
pub fn canonicalize(scopes: &[String]) -> Vec<String> {
    let mut groups: HashMap<(String, String), Vec<String>> = HashMap::new();
    let mut verbatim: Vec<String> = Vec::new();

    for scope in scopes {
        let parts: Vec<&str> = scope.splitn(3, ':').collect();
        let [resource, name, actions_str] = parts[..] else {
            verbatim.push(scope.clone());
            continue;
        };

        let actions: Vec<String> = actions_str
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        groups.entry((resource.to_string(), name.to_string())).or_default().extend(actions);
    }

    let mut result = verbatim;

    for ((resource, name), mut actions) in groups {
        actions.sort();
        actions.dedup();
        if actions.iter().any(|a| a == "*") {
            actions = vec!["*".to_string()];
        }
        result.push(format!("{resource}:{name}:{}", actions.join(",")));
    }

    result.sort();
    result
}
