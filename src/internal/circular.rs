//! Install-time circular dependency detection.

use std::collections::HashSet;

use crate::name::ServiceName;

const MAX_DEPTH: usize = 1024;

/// Searches the installed graph for a path from any of `requires` back to
/// one of `provides`.
///
/// `dependencies_of` returns the declared dependencies of the controller
/// installed under a name, or `None` when the name is vacant. The returned
/// path starts with `origin` and ends with the provided name that closes
/// the cycle, e.g. `[a, b, c, a]`.
pub(crate) fn find_cycle<F>(
    origin: &ServiceName,
    provides: &[ServiceName],
    requires: &[ServiceName],
    dependencies_of: F,
) -> Option<Vec<ServiceName>>
where
    F: Fn(&ServiceName) -> Option<Vec<ServiceName>>,
{
    let mut visited: HashSet<ServiceName> = HashSet::new();
    for start in requires {
        let mut path = vec![origin.clone()];
        // explicit stack of (name, remaining dependencies) to avoid deep
        // recursion on long chains
        let mut stack: Vec<(ServiceName, Vec<ServiceName>)> = Vec::new();
        let mut next = Some(start.clone());

        loop {
            if let Some(name) = next.take() {
                path.push(name.clone());
                if provides.contains(&name) {
                    return Some(path);
                }
                if stack.len() >= MAX_DEPTH {
                    tracing::warn!(service = %origin, "dependency chain too deep for cycle detection");
                    return None;
                }
                if visited.insert(name.clone()) {
                    let mut deps = dependencies_of(&name).unwrap_or_default();
                    deps.reverse();
                    stack.push((name, deps));
                } else {
                    path.pop();
                }
            }
            match stack.last_mut() {
                None => break,
                Some((_, deps)) => match deps.pop() {
                    Some(dep) => next = Some(dep),
                    None => {
                        stack.pop();
                        path.pop();
                    }
                },
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn n(s: &str) -> ServiceName {
        ServiceName::parse(s).unwrap()
    }

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<ServiceName, Vec<ServiceName>> {
        edges
            .iter()
            .map(|(from, to)| (n(from), to.iter().map(|t| n(t)).collect()))
            .collect()
    }

    #[test]
    fn test_reports_full_path() {
        let g = graph(&[("b", &["c"]), ("c", &["a"])]);
        let path = find_cycle(&n("a"), &[n("a")], &[n("b")], |x| g.get(x).cloned());
        assert_eq!(path, Some(vec![n("a"), n("b"), n("c"), n("a")]));
    }

    #[test]
    fn test_self_dependency() {
        let path = find_cycle(&n("a"), &[n("a")], &[n("a")], |_| None);
        assert_eq!(path, Some(vec![n("a"), n("a")]));
    }

    #[test]
    fn test_alias_closes_cycle() {
        let g = graph(&[("b", &["a.alias"])]);
        let path = find_cycle(&n("a"), &[n("a"), n("a.alias")], &[n("b")], |x| g.get(x).cloned());
        assert_eq!(path, Some(vec![n("a"), n("b"), n("a.alias")]));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let g = graph(&[("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        assert!(find_cycle(&n("a"), &[n("a")], &[n("b"), n("c")], |x| g.get(x).cloned()).is_none());
    }
}
