//! Module dependency graph discovered while combining.
//!
//! The bundler never needs the graph to produce output; the visited set alone
//! orders and terminates the walk. The graph records which edges were seen so
//! that cycles can be reported and inspected.

use petgraph::{
    Direction,
    algo::{is_cyclic_directed, tarjan_scc},
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: FxHashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, module_id: &str) -> NodeIndex {
        if let Some(&index) = self.nodes.get(module_id) {
            return index;
        }
        let index = self.graph.add_node(module_id.to_owned());
        self.nodes.insert(module_id.to_owned(), index);
        index
    }

    /// Record that `from` requires `to`
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        let from = self.add_module(from);
        let to = self.add_module(to);
        self.graph.update_edge(from, to, ());
    }

    /// Direct dependencies of `module_id` in the order they were recorded
    pub fn dependencies_of(&self, module_id: &str) -> Vec<&str> {
        let Some(&index) = self.nodes.get(module_id) else {
            return Vec::new();
        };
        // petgraph yields neighbors most-recent first
        let mut deps: Vec<&str> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .map(|n| self.graph[n].as_str())
            .collect();
        deps.reverse();
        deps
    }

    pub fn module_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Groups of modules that require each other, including self-requiring modules
    pub fn cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| self.graph.contains_edge(n, n))
            })
            .map(|component| {
                let mut ids: Vec<String> =
                    component.into_iter().map(|n| self.graph[n].clone()).collect();
                ids.sort();
                ids
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_keep_insertion_order() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("foo", "io/File");
        graph.add_dependency("foo", "net/Http");
        graph.add_dependency("foo", "er/View");
        graph.add_dependency("er/View", "net/Http");
        graph.add_dependency("foo", "net/Http");

        assert_eq!(graph.dependencies_of("foo"), vec!["io/File", "net/Http", "er/View"]);
        assert_eq!(graph.module_count(), 4);
        assert_eq!(graph.dependency_count(), 4);
        assert!(!graph.has_cycles());
        assert!(graph.cycles().is_empty());
        assert!(graph.dependencies_of("missing").is_empty());
    }

    #[test]
    fn test_cycles_are_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("cycle/a", "cycle/b");
        graph.add_dependency("cycle/b", "cycle/a");
        graph.add_dependency("cycle/a", "leaf");
        graph.add_dependency("self", "self");

        assert!(graph.has_cycles());
        let mut cycles = graph.cycles();
        cycles.sort();
        assert_eq!(
            cycles,
            vec![
                vec!["cycle/a".to_owned(), "cycle/b".to_owned()],
                vec!["self".to_owned()]
            ]
        );
    }
}
