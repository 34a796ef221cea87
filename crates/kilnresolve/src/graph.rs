// kiln: The package manager core for C and C++.
// Copyright (C) 2024 International Digital Economy Academy
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// For inquiries, you can contact us via e-mail at jichuruanjian@idea.edu.cn.

//! The resolved dependency graph and its build-order leveling.
//!
//! Edges point consumer → dependency. Node identity is the graph occurrence,
//! never the reference: the same `zlib/1.2.13` can legitimately appear as
//! two distinct nodes (for example statically built into two consumers), so
//! equality of references says nothing about equality of nodes.

use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use kilnutil::reference::PkgReference;

/// Identity of one node, valid only within the graph that produced it.
pub type NodeId = NodeIndex;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// The package dependency DAG of one command invocation. Built fresh per
/// command, discarded after.
#[derive(Debug, Default)]
pub struct DepsGraph {
    graph: DiGraph<PkgReference, ()>,
}

impl DepsGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, reference: PkgReference) -> NodeId {
        self.graph.add_node(reference)
    }

    /// Records that `consumer` depends on `dependency`.
    pub fn add_dependency(&mut self, consumer: NodeId, dependency: NodeId) {
        self.graph.add_edge(consumer, dependency, ());
    }

    pub fn reference(&self, node: NodeId) -> &PkgReference {
        &self.graph[node]
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        self.graph.node_indices()
    }

    /// The direct dependencies of `node`, in the order the edges were added.
    pub fn dependencies(&self, node: NodeId) -> Vec<NodeId> {
        // petgraph iterates neighbors most-recently-added first.
        let mut deps: Vec<NodeId> = self.graph.neighbors(node).collect();
        deps.reverse();
        deps
    }

    /// The transitive dependencies of `node` in breadth-first order, direct
    /// dependencies first, each occurrence visited once. `node` itself is
    /// not included.
    pub fn closure(&self, node: NodeId) -> Vec<NodeId> {
        let mut visited = vec![false; self.graph.node_count()];
        visited[node.index()] = true;
        let mut queue: std::collections::VecDeque<NodeId> =
            self.dependencies(node).into_iter().collect();
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if visited[next.index()] {
                continue;
            }
            visited[next.index()] = true;
            out.push(next);
            queue.extend(self.dependencies(next));
        }
        out
    }

    /// Groups nodes into build levels by repeatedly peeling the current
    /// leaves: level 0 holds the nodes with no dependencies at all, level
    /// *k* the nodes whose dependencies all sit in levels below *k*. Within
    /// a level, order is node insertion order, so identical graphs produce
    /// identical build logs.
    pub fn by_levels(&self) -> Result<Vec<Vec<NodeId>>, GraphError> {
        let mut remaining = vec![true; self.graph.node_count()];
        let mut remaining_count = self.graph.node_count();
        let mut levels = Vec::new();
        while remaining_count > 0 {
            let level: Vec<NodeId> = self
                .graph
                .node_indices()
                .filter(|n| {
                    remaining[n.index()]
                        && !self.graph.neighbors(*n).any(|d| remaining[d.index()])
                })
                .collect();
            if level.is_empty() {
                return Err(GraphError::Cycle {
                    path: self.example_cycle(&remaining),
                });
            }
            for node in &level {
                remaining[node.index()] = false;
            }
            remaining_count -= level.len();
            log::debug!(
                "build level {}: [{}]",
                levels.len(),
                level
                    .iter()
                    .map(|n| self.graph[*n].to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            levels.push(level);
        }
        Ok(levels)
    }

    /// [`DepsGraph::by_levels`] flattened: a total build order,
    /// dependencies before their consumers.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        Ok(self.by_levels()?.into_iter().flatten().collect())
    }

    /// Walks forward from an arbitrary stuck node until a node repeats,
    /// yielding one concrete cycle for the error message.
    fn example_cycle(&self, remaining: &[bool]) -> Vec<String> {
        let start = self
            .graph
            .node_indices()
            .find(|n| remaining[n.index()])
            .expect("a stuck subgraph has at least one node");
        let mut path: Vec<NodeId> = vec![start];
        loop {
            let current = *path.last().expect("path never empty");
            let next = self
                .dependencies(current)
                .into_iter()
                .find(|d| remaining[d.index()])
                .expect("every stuck node keeps a remaining dependency");
            if let Some(pos) = path.iter().position(|n| *n == next) {
                path.push(next);
                return path[pos..]
                    .iter()
                    .map(|n| self.graph[*n].to_string())
                    .collect();
            }
            path.push(next);
        }
    }
}

#[cfg(test)]
mod test {
    use expect_test::expect;
    use test_log::test;

    use super::*;

    fn reference(name: &str) -> PkgReference {
        format!("{name}/1.0.0").parse().unwrap()
    }

    #[test]
    fn diamond_levels() {
        let mut graph = DepsGraph::new();
        let n1 = graph.add_node(reference("app"));
        let n2 = graph.add_node(reference("mid"));
        let n31 = graph.add_node(reference("leafa"));
        let n32 = graph.add_node(reference("leafb"));
        graph.add_dependency(n1, n2);
        graph.add_dependency(n2, n31);
        graph.add_dependency(n2, n32);
        let levels = graph.by_levels().unwrap();
        assert_eq!(levels, vec![vec![n31, n32], vec![n2], vec![n1]]);
    }

    #[test]
    fn cross_level_dependency_pushes_a_node_up() {
        let mut graph = DepsGraph::new();
        let n1 = graph.add_node(reference("app"));
        let n2 = graph.add_node(reference("mid"));
        let n5 = graph.add_node(reference("base"));
        let n31 = graph.add_node(reference("leafa"));
        let n32 = graph.add_node(reference("leafb"));
        graph.add_dependency(n1, n2);
        graph.add_dependency(n1, n5);
        graph.add_dependency(n2, n31);
        graph.add_dependency(n2, n32);
        graph.add_dependency(n32, n5);
        let levels = graph.by_levels().unwrap();
        // n32 depends on n5, so it cannot share n5's level.
        assert_eq!(
            levels,
            vec![vec![n5, n31], vec![n32], vec![n2], vec![n1]]
        );
    }

    #[test]
    fn duplicate_references_are_distinct_nodes() {
        let mut graph = DepsGraph::new();
        let app = graph.add_node(reference("app"));
        let zlib_a = graph.add_node(reference("zlib"));
        let zlib_b = graph.add_node(reference("zlib"));
        graph.add_dependency(app, zlib_a);
        graph.add_dependency(app, zlib_b);
        assert_ne!(zlib_a, zlib_b);
        let levels = graph.by_levels().unwrap();
        assert_eq!(levels, vec![vec![zlib_a, zlib_b], vec![app]]);
    }

    #[test]
    fn cycle_is_reported_not_spun() {
        let mut graph = DepsGraph::new();
        let a = graph.add_node(reference("a"));
        let b = graph.add_node(reference("b"));
        let c = graph.add_node(reference("c"));
        graph.add_dependency(a, b);
        graph.add_dependency(b, c);
        graph.add_dependency(c, a);
        let err = graph.by_levels().unwrap_err();
        expect!["dependency cycle detected: a/1.0.0 -> b/1.0.0 -> c/1.0.0 -> a/1.0.0"]
            .assert_eq(&err.to_string());
    }

    #[test]
    fn cycle_below_a_healthy_level_is_still_found() {
        let mut graph = DepsGraph::new();
        let app = graph.add_node(reference("app"));
        let a = graph.add_node(reference("a"));
        let b = graph.add_node(reference("b"));
        let leaf = graph.add_node(reference("leaf"));
        graph.add_dependency(app, a);
        graph.add_dependency(a, b);
        graph.add_dependency(b, a);
        graph.add_dependency(app, leaf);
        let err = graph.by_levels().unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn closure_walks_direct_deps_first() {
        let mut graph = DepsGraph::new();
        let app = graph.add_node(reference("app"));
        let ssl = graph.add_node(reference("openssl"));
        let zlib = graph.add_node(reference("zlib"));
        graph.add_dependency(app, ssl);
        graph.add_dependency(app, zlib);
        graph.add_dependency(ssl, zlib);
        assert_eq!(graph.closure(app), vec![ssl, zlib]);
        assert_eq!(graph.closure(ssl), vec![zlib]);
        assert!(graph.closure(zlib).is_empty());
    }

    #[test]
    fn topological_order_flattens_levels() {
        let mut graph = DepsGraph::new();
        let n1 = graph.add_node(reference("app"));
        let n2 = graph.add_node(reference("mid"));
        let n3 = graph.add_node(reference("leaf"));
        graph.add_dependency(n1, n2);
        graph.add_dependency(n2, n3);
        assert_eq!(graph.topological_order().unwrap(), vec![n3, n2, n1]);
    }
}
