//! Graph queries: components, cycles, paths and neighbourhoods.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Result;
use petgraph::algo::astar;
use petgraph::graph::UnGraph;
use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{EdgeRef, NodeIndexable};

use super::Network;
use crate::error::NetworkError;

impl Network {
    /// Plain undirected multigraph of the network (one edge per link).
    ///
    /// Node weights are the network's node indices; edge weights are link widths.
    pub fn to_graph(&self) -> UnGraph<NodeIndex, usize> {
        let mut graph = UnGraph::with_capacity(self.node_count(), self.link_count());
        let mut map = BTreeMap::new();
        for n in self.graph.node_indices() {
            map.insert(n, graph.add_node(n));
        }
        for e in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(e) {
                let dim = self
                    .link_dim(e)
                    .expect("every link joins two registered buckets");
                graph.add_edge(map[&a], map[&b], dim);
            }
        }
        graph
    }

    /// Links joining `a` and `b`.
    pub fn links_between(&self, a: NodeIndex, b: NodeIndex) -> Vec<EdgeIndex> {
        if a == b || !self.graph.contains_node(a) {
            return Vec::new();
        }
        let mut links: Vec<EdgeIndex> = self
            .graph
            .edges(a)
            .filter(|e| e.source() == b || e.target() == b)
            .map(|e| e.id())
            .collect();
        links.sort();
        links.dedup();
        links
    }

    /// Distinct nodes linked to `n`, in ascending order.
    pub fn internal_connected(&self, n: NodeIndex) -> Result<BTreeSet<NodeIndex>> {
        if !self.graph.contains_node(n) {
            return Err(NetworkError::NodeNotFound(n).into());
        }
        Ok(self.graph.neighbors(n).filter(|&m| m != n).collect())
    }

    /// Connected components, each listed in ascending node order.
    pub fn connected_components(&self) -> Vec<Vec<NodeIndex>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for start in self.graph.node_indices() {
            if !seen.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(n) = queue.pop_front() {
                for m in self.graph.neighbors(n) {
                    if seen.insert(m) {
                        component.push(m);
                        queue.push_back(m);
                    }
                }
            }
            component.sort();
            components.push(component);
        }
        components
    }

    /// Number of connected components, counted with a union-find over the links.
    pub fn component_count(&self) -> usize {
        let bound = self.graph.node_bound();
        let mut uf = UnionFind::<usize>::new(bound);
        for e in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(e) {
                uf.union(a.index(), b.index());
            }
        }
        let roots: BTreeSet<usize> = self
            .graph
            .node_indices()
            .map(|n| uf.find(n.index()))
            .collect();
        roots.len()
    }

    /// Number of independent cycles: links - nodes + components.
    pub fn cyclomatic_number(&self) -> usize {
        (self.link_count() + self.component_count()).saturating_sub(self.node_count())
    }

    pub fn is_acyclic(&self) -> bool {
        self.cyclomatic_number() == 0
    }

    /// Fundamental cycle basis with respect to a breadth-first spanning forest.
    ///
    /// Each cycle is a node sequence in traversal order; consecutive nodes (and
    /// the last and first) are linked. Parallel links yield two-node cycles.
    /// The number of cycles equals [`Self::cyclomatic_number`].
    pub fn cycle_basis(&self) -> Vec<Vec<NodeIndex>> {
        let mut parent: BTreeMap<NodeIndex, (NodeIndex, EdgeIndex)> = BTreeMap::new();
        let mut depth: BTreeMap<NodeIndex, usize> = BTreeMap::new();
        let mut tree_edges = BTreeSet::new();

        for root in self.graph.node_indices() {
            if depth.contains_key(&root) {
                continue;
            }
            depth.insert(root, 0);
            let mut queue = VecDeque::from([root]);
            while let Some(n) = queue.pop_front() {
                let d = depth[&n];
                let mut edges: Vec<_> = self.graph.edges(n).map(|e| e.id()).collect();
                edges.sort();
                for e in edges {
                    let Some((a, b)) = self.graph.edge_endpoints(e) else {
                        continue;
                    };
                    let m = if a == n { b } else { a };
                    if depth.contains_key(&m) {
                        continue;
                    }
                    depth.insert(m, d + 1);
                    parent.insert(m, (n, e));
                    tree_edges.insert(e);
                    queue.push_back(m);
                }
            }
        }

        let mut cycles = Vec::new();
        for e in self.graph.edge_indices() {
            if tree_edges.contains(&e) {
                continue;
            }
            let Some((a, b)) = self.graph.edge_endpoints(e) else {
                continue;
            };
            // climb from both ends to the lowest common ancestor
            let (mut u, mut v) = (a, b);
            let mut left = vec![u];
            let mut right = vec![v];
            while u != v {
                if depth[&u] >= depth[&v] {
                    u = parent[&u].0;
                    left.push(u);
                } else {
                    v = parent[&v].0;
                    right.push(v);
                }
            }
            // `left` and `right` both end at the common ancestor
            right.pop();
            right.reverse();
            left.extend(right);
            cycles.push(left);
        }
        cycles
    }

    /// Shortest node path from `a` to `b` (inclusive), by number of links.
    pub fn shortest_path(&self, a: NodeIndex, b: NodeIndex) -> Result<Option<Vec<NodeIndex>>> {
        for n in [a, b] {
            if !self.graph.contains_node(n) {
                return Err(NetworkError::NodeNotFound(n).into());
            }
        }
        Ok(astar(&self.graph, a, |n| n == b, |_| 1usize, |_| 0usize).map(|(_, path)| path))
    }
}
