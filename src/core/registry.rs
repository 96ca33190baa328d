//! Named-query registry and view dependency checks.

use super::error::ParseError;
use super::query::Query;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Name-keyed, insertion-ordered collection of view queries.
///
/// Mutation needs `&mut self`; executions share `&QueryRegistry`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRegistry {
    queries: IndexMap<String, Query>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a view; an existing name is rejected.
    pub fn register(&mut self, query: Query) -> Result<(), ParseError> {
        if self.queries.contains_key(&query.name) {
            return Err(ParseError::DuplicateView(query.name));
        }
        trace!(view = %query.name, "registering view");
        self.queries.insert(query.name.clone(), query);
        Ok(())
    }

    /// Add or overwrite a view, returning the previous definition.
    pub fn replace(&mut self, query: Query) -> Option<Query> {
        trace!(view = %query.name, "replacing view");
        self.queries.insert(query.name.clone(), query)
    }

    pub fn get(&self, name: &str) -> Option<&Query> {
        self.queries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Query)> {
        self.queries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn remove(&mut self, name: &str) -> Option<Query> {
        trace!(view = name, "removing view");
        self.queries.shift_remove(name)
    }

    pub fn clear(&mut self) {
        trace!(count = self.queries.len(), "clearing registry");
        self.queries.clear();
    }

    /// Views `name` references directly; empty for unknown names.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.queries
            .get(name)
            .map(|q| q.references())
            .unwrap_or_default()
    }

    /// Fail when the registered views reference each other in a cycle.
    pub fn check_cycles(&self) -> Result<(), ParseError> {
        let graph: IndexMap<&str, Vec<&str>> = self
            .queries
            .iter()
            .map(|(name, q)| (name.as_str(), q.references()))
            .collect();
        match cycle_members(&graph) {
            members if members.is_empty() => Ok(()),
            members => Err(ParseError::CyclicReference(members)),
        }
    }
}

/// Nodes left over by Kahn's algorithm: every node on, or downstream of, a
/// cycle among known nodes. Edges to unknown nodes are ignored. Sorted.
pub fn cycle_members(graph: &IndexMap<&str, Vec<&str>>) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = graph.keys().map(|k| (*k, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (node, deps) in graph {
        let mut seen: Vec<&str> = Vec::new();
        for dep in deps {
            if !graph.contains_key(dep) || seen.contains(dep) {
                continue;
            }
            seen.push(*dep);
            dependents.entry(*dep).or_default().push(*node);
            if let Some(degree) = in_degree.get_mut(node) {
                *degree += 1;
            }
        }
    }

    // Kahn's algorithm with sorted tie-breaking
    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(n, _)| *n)
        .collect();
    ready.sort_unstable();
    let mut queue: VecDeque<&str> = ready.into_iter().collect();
    let mut visited = 0usize;

    while let Some(current) = queue.pop_front() {
        visited += 1;
        let mut next_ready = Vec::new();
        for dependent in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    next_ready.push(*dependent);
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if visited == graph.len() {
        return Vec::new();
    }
    let mut members: Vec<String> = in_degree
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(n, _)| n.to_string())
        .collect();
    members.sort();
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(name: &str, from: Option<&str>) -> Query {
        let mut b = Query::builder().named(name);
        if let Some(src) = from {
            b = b.from(src);
        }
        b.build().unwrap()
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let mut reg = QueryRegistry::new();
        reg.register(view("recent", None)).unwrap();
        reg.register(view("starred", Some("recent"))).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.contains("recent"));
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["recent", "starred"]);
        assert_eq!(reg.dependencies("starred"), vec!["recent"]);
        assert!(reg.dependencies("nope").is_empty());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut reg = QueryRegistry::new();
        reg.register(view("recent", None)).unwrap();
        let err = reg.register(view("recent", None)).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateView(ref n) if n == "recent"));
        assert!(reg.replace(view("recent", Some("other"))).is_some());
        assert_eq!(reg.dependencies("recent"), vec!["other"]);
    }

    #[test]
    fn test_registry_remove_keeps_order() {
        let mut reg = QueryRegistry::new();
        for name in ["a", "b", "c"] {
            reg.register(view(name, None)).unwrap();
        }
        assert!(reg.remove("a").is_some());
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["b", "c"]);
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_registry_detects_cycle() {
        let mut reg = QueryRegistry::new();
        reg.register(view("a", Some("b"))).unwrap();
        reg.register(view("b", Some("a"))).unwrap();
        reg.register(view("c", None)).unwrap();
        let err = reg.check_cycles().unwrap_err();
        assert!(matches!(err, ParseError::CyclicReference(ref m) if m == &["a", "b"]));
    }

    #[test]
    fn test_cycle_members_ignores_unknown_references() {
        let mut graph: IndexMap<&str, Vec<&str>> = IndexMap::new();
        graph.insert("x", vec!["unknown"]);
        graph.insert("y", vec!["x", "x"]);
        assert!(cycle_members(&graph).is_empty());

        graph.insert("z", vec!["z"]);
        assert_eq!(cycle_members(&graph), vec!["z"]);
    }
}
