//! Network of ArrayTensor nodes joined by links between index buckets.
//!
//! Every tensor index is a *bucket* with a network-unique [`BucketId`]. A link
//! pairs two buckets of equal width on different nodes; unlinked buckets are
//! the network's external indices, kept in an explicit order that defines the
//! shape of the tensor the network represents.
//!
//! The graph is a petgraph `StableGraph` (one graph node per tensor, one edge
//! per link, parallel edges allowed). Bucket bookkeeping lives in an ordered
//! map keyed by id so iteration order is deterministic.

mod ops;
mod topology;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anyhow::{Context, Result};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::Undirected;
use tnr_core::ArrayTensor;

use crate::error::NetworkError;

pub use ops::SplitOutcome;

/// Network-unique identifier of a tensor index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(pub u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// One index of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub(crate) id: BucketId,
    pub(crate) node: NodeIndex,
    pub(crate) position: usize,
    pub(crate) link: Option<EdgeIndex>,
}

impl Bucket {
    pub fn id(&self) -> BucketId {
        self.id
    }

    /// Node owning this bucket.
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    /// Tensor axis of the owning node.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Link attached to this bucket, if any.
    pub fn link(&self) -> Option<EdgeIndex> {
        self.link
    }
}

/// A tensor together with the bucket ids of its axes (`buckets[i]` is axis `i`).
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) tensor: ArrayTensor,
    pub(crate) buckets: Vec<BucketId>,
}

impl Node {
    pub fn tensor(&self) -> &ArrayTensor {
        &self.tensor
    }

    pub fn buckets(&self) -> &[BucketId] {
        &self.buckets
    }

    pub fn rank(&self) -> usize {
        self.buckets.len()
    }
}

/// Pairing of two buckets on different nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub bucket1: BucketId,
    pub bucket2: BucketId,
}

impl Link {
    /// The bucket on the other end from `bucket`.
    pub fn other(&self, bucket: BucketId) -> Option<BucketId> {
        if bucket == self.bucket1 {
            Some(self.bucket2)
        } else if bucket == self.bucket2 {
            Some(self.bucket1)
        } else {
            None
        }
    }
}

/// Description of a node to install: tensor plus its bucket ids.
#[derive(Debug, Clone)]
pub(crate) struct NodeSpec {
    pub tensor: ArrayTensor,
    pub buckets: Vec<BucketId>,
}

/// A collection of tensors joined by links.
#[derive(Debug, Clone, Default)]
pub struct Network {
    graph: StableGraph<Node, Link, Undirected>,
    buckets: BTreeMap<BucketId, Bucket>,
    external: Vec<BucketId>,
    next_bucket: u64,
}

impl Network {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::with_capacity(0, 0),
            buckets: BTreeMap::new(),
            external: Vec::new(),
            next_bucket: 0,
        }
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Add a tensor as a new node with fresh, unlinked buckets.
    ///
    /// The new buckets are appended to the external order.
    pub fn add_node(&mut self, tensor: ArrayTensor) -> NodeIndex {
        let buckets: Vec<BucketId> = (0..tensor.rank()).map(|_| self.fresh_bucket()).collect();
        self.external.extend(buckets.iter().copied());
        self.install(NodeSpec { tensor, buckets })
    }

    pub(crate) fn fresh_bucket(&mut self) -> BucketId {
        let id = BucketId(self.next_bucket);
        self.next_bucket += 1;
        id
    }

    /// Insert a graph node and point its buckets at it.
    fn install(&mut self, spec: NodeSpec) -> NodeIndex {
        let NodeSpec { tensor, buckets } = spec;
        let idx = self.graph.add_node(Node {
            tensor,
            buckets: buckets.clone(),
        });
        for (position, id) in buckets.into_iter().enumerate() {
            self.buckets
                .entry(id)
                .and_modify(|b| {
                    b.node = idx;
                    b.position = position;
                })
                .or_insert(Bucket {
                    id,
                    node: idx,
                    position,
                    link: None,
                });
        }
        idx
    }

    /// Add a graph edge between two existing buckets without touching the external order.
    pub(crate) fn connect(&mut self, b1: BucketId, b2: BucketId) -> Result<EdgeIndex> {
        let n1 = self.bucket(b1)?.node;
        let n2 = self.bucket(b2)?.node;
        let edge = self.graph.add_edge(
            n1,
            n2,
            Link {
                bucket1: b1,
                bucket2: b2,
            },
        );
        for b in [b1, b2] {
            if let Some(bucket) = self.buckets.get_mut(&b) {
                bucket.link = Some(edge);
            }
        }
        Ok(edge)
    }

    /// Replace `old` nodes by `new` ones.
    ///
    /// Buckets of the old nodes that reappear in a new node keep their identity
    /// and their links; buckets that do not reappear are deleted. `new_links`
    /// are added afterwards. A surviving bucket whose partner was deleted
    /// becomes external. Returns the new node indices in order.
    pub(crate) fn replace_nodes(
        &mut self,
        old: &[NodeIndex],
        new: Vec<NodeSpec>,
        new_links: &[(BucketId, BucketId)],
    ) -> Result<Vec<NodeIndex>> {
        let mut incident: BTreeMap<EdgeIndex, Link> = BTreeMap::new();
        for &n in old {
            if !self.graph.contains_node(n) {
                return Err(NetworkError::NodeNotFound(n).into());
            }
            for e in self.graph.edges(n) {
                incident.insert(e.id(), *e.weight());
            }
        }
        for spec in &new {
            if spec.tensor.rank() != spec.buckets.len() {
                return Err(NetworkError::Inconsistent(format!(
                    "tensor of rank {} installed with {} buckets",
                    spec.tensor.rank(),
                    spec.buckets.len()
                ))
                .into());
            }
        }
        let kept: BTreeSet<BucketId> = new.iter().flat_map(|s| s.buckets.iter().copied()).collect();

        for &n in old {
            let node = self
                .graph
                .remove_node(n)
                .ok_or(NetworkError::NodeNotFound(n))?;
            for b in node.buckets {
                if kept.contains(&b) {
                    if let Some(bucket) = self.buckets.get_mut(&b) {
                        bucket.link = None;
                    }
                } else {
                    self.buckets.remove(&b);
                    self.external.retain(|x| *x != b);
                }
            }
        }

        let created: Vec<NodeIndex> = new.into_iter().map(|spec| self.install(spec)).collect();

        for link in incident.into_values() {
            let alive1 = self.buckets.contains_key(&link.bucket1);
            let alive2 = self.buckets.contains_key(&link.bucket2);
            match (alive1, alive2) {
                (true, true) => {
                    self.connect(link.bucket1, link.bucket2)?;
                }
                (true, false) => self.orphan(link.bucket1),
                (false, true) => self.orphan(link.bucket2),
                (false, false) => {}
            }
        }
        for &(b1, b2) in new_links {
            self.connect(b1, b2)?;
        }
        Ok(created)
    }

    /// Replace `old` nodes by every node and link of `sub`.
    ///
    /// `sub` must share this network's bucket ids, as a copy made by
    /// [`Self::copy_subset`] and then rewritten does. Links of `old` to the
    /// rest of the network survive through the buckets `sub` keeps.
    pub(crate) fn adopt(&mut self, old: &[NodeIndex], sub: Network) -> Result<Vec<NodeIndex>> {
        self.next_bucket = self.next_bucket.max(sub.next_bucket);
        let specs: Vec<NodeSpec> = sub
            .graph
            .node_weights()
            .map(|node| NodeSpec {
                tensor: node.tensor.clone(),
                buckets: node.buckets.clone(),
            })
            .collect();
        // links that already exist here are restored by replace_nodes
        let links: Vec<(BucketId, BucketId)> = sub
            .graph
            .edge_weights()
            .filter(|l| !matches!(self.partner(l.bucket1), Ok(Some(p)) if p == l.bucket2))
            .map(|l| (l.bucket1, l.bucket2))
            .collect();
        self.replace_nodes(old, specs, &links)
    }

    fn orphan(&mut self, b: BucketId) {
        if let Some(bucket) = self.buckets.get_mut(&b) {
            bucket.link = None;
            self.external.push(b);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn node(&self, n: NodeIndex) -> Result<&Node> {
        self.graph
            .node_weight(n)
            .ok_or_else(|| NetworkError::NodeNotFound(n).into())
    }

    pub fn tensor(&self, n: NodeIndex) -> Result<&ArrayTensor> {
        Ok(&self.node(n)?.tensor)
    }

    pub fn contains_node(&self, n: NodeIndex) -> bool {
        self.graph.contains_node(n)
    }

    pub fn bucket(&self, id: BucketId) -> Result<&Bucket> {
        self.buckets
            .get(&id)
            .ok_or_else(|| NetworkError::BucketNotFound(id).into())
    }

    /// Width of a bucket's index.
    pub fn bucket_dim(&self, id: BucketId) -> Result<usize> {
        let bucket = self.bucket(id)?;
        Ok(self.node(bucket.node)?.tensor.dims()[bucket.position])
    }

    /// Node owning a bucket.
    pub fn node_of(&self, id: BucketId) -> Result<NodeIndex> {
        Ok(self.bucket(id)?.node)
    }

    /// The bucket linked to `id`, if `id` is linked.
    pub fn partner(&self, id: BucketId) -> Result<Option<BucketId>> {
        match self.bucket(id)?.link {
            None => Ok(None),
            Some(e) => Ok(self.link_weight(e)?.other(id)),
        }
    }

    pub fn link_weight(&self, e: EdgeIndex) -> Result<&Link> {
        self.graph
            .edge_weight(e)
            .ok_or_else(|| NetworkError::LinkNotFound(e).into())
    }

    /// Width of a link.
    pub fn link_dim(&self, e: EdgeIndex) -> Result<usize> {
        self.bucket_dim(self.link_weight(e)?.bucket1)
    }

    /// Node indices in ascending order.
    pub fn node_indices(&self) -> Vec<NodeIndex> {
        self.graph.node_indices().collect()
    }

    /// Link indices in ascending order.
    pub fn links(&self) -> Vec<EdgeIndex> {
        self.graph.edge_indices().collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// External buckets in the order defining the network's shape.
    pub fn external_buckets(&self) -> &[BucketId] {
        &self.external
    }

    /// Widths of the external buckets.
    ///
    /// # Panics
    /// If the external order names an unregistered bucket, which [`Self::check`] rejects.
    pub fn shape(&self) -> Vec<usize> {
        self.external
            .iter()
            .map(|&b| {
                self.bucket_dim(b)
                    .expect("external order lists only registered buckets")
            })
            .collect()
    }

    /// Buckets attached to a link.
    pub fn internal_buckets(&self) -> BTreeSet<BucketId> {
        self.buckets
            .iter()
            .filter(|(_, b)| b.link.is_some())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Total number of stored elements over all nodes.
    pub fn total_size(&self) -> usize {
        self.graph
            .node_indices()
            .map(|n| self.graph[n].tensor.size())
            .sum()
    }

    /// Append an unlinked bucket to the external order.
    pub(crate) fn push_external(&mut self, b: BucketId) {
        if !self.external.contains(&b) {
            self.external.push(b);
        }
    }

    /// Replace the external order. `order` must be a permutation of the current one.
    pub fn set_external_order(&mut self, order: Vec<BucketId>) -> Result<()> {
        let current: BTreeSet<BucketId> = self.external.iter().copied().collect();
        let proposed: BTreeSet<BucketId> = order.iter().copied().collect();
        if current != proposed || order.len() != self.external.len() {
            return Err(NetworkError::Inconsistent(
                "new external order is not a permutation of the external buckets".into(),
            )
            .into());
        }
        self.external = order;
        Ok(())
    }

    // ========================================================================
    // Copies
    // ========================================================================

    /// Copy the induced subnetwork on `nodes`, preserving bucket ids.
    ///
    /// Links to nodes outside the subset are dropped, which leaves their
    /// buckets external in the copy. The copy's external order lists buckets
    /// external in `self` first (in `self`'s order), then the cut ones by node.
    /// Returns the copy and the node index map from `self` to the copy.
    pub fn copy_subset(
        &self,
        nodes: &BTreeSet<NodeIndex>,
    ) -> Result<(Network, BTreeMap<NodeIndex, NodeIndex>)> {
        let mut copy = Network::new();
        copy.next_bucket = self.next_bucket;
        let mut map = BTreeMap::new();
        for &n in nodes {
            let node = self.node(n)?;
            let idx = copy.install(NodeSpec {
                tensor: node.tensor.clone(),
                buckets: node.buckets.clone(),
            });
            map.insert(n, idx);
        }
        for e in self.graph.edge_indices() {
            let (a, b) = self
                .graph
                .edge_endpoints(e)
                .ok_or(NetworkError::LinkNotFound(e))?;
            if nodes.contains(&a) && nodes.contains(&b) {
                let link = *self.link_weight(e)?;
                copy.connect(link.bucket1, link.bucket2)?;
            }
        }
        copy.external = self
            .external
            .iter()
            .copied()
            .filter(|b| copy.buckets.contains_key(b))
            .collect();
        for &n in nodes {
            for &b in &self.node(n)?.buckets {
                let unlinked = copy.buckets.get(&b).is_some_and(|bk| bk.link.is_none());
                if unlinked && !copy.external.contains(&b) {
                    copy.external.push(b);
                }
            }
        }
        Ok((copy, map))
    }

    /// Move every node of `other` into `self` under fresh bucket ids.
    ///
    /// Links inside `other` are preserved; `other`'s external buckets are
    /// appended to `self`'s external order. Returns the bucket id map.
    pub fn absorb(&mut self, other: Network) -> Result<BTreeMap<BucketId, BucketId>> {
        let mut rename = BTreeMap::new();
        for &id in other.buckets.keys() {
            let fresh = self.fresh_bucket();
            rename.insert(id, fresh);
        }
        let renamed = |id: &BucketId| -> Result<BucketId> {
            rename
                .get(id)
                .copied()
                .ok_or_else(|| NetworkError::BucketNotFound(*id).into())
        };

        for n in other.graph.node_indices() {
            let node = &other.graph[n];
            let buckets = node.buckets.iter().map(renamed).collect::<Result<Vec<_>>>()?;
            self.install(NodeSpec {
                tensor: node.tensor.clone(),
                buckets,
            });
        }
        for e in other.graph.edge_indices() {
            let link = other.graph[e];
            self.connect(renamed(&link.bucket1)?, renamed(&link.bucket2)?)?;
        }
        for b in &other.external {
            self.external.push(renamed(b)?);
        }
        Ok(rename)
    }

    // ========================================================================
    // Dense evaluation
    // ========================================================================

    /// Contract the whole network into one dense tensor in external order.
    ///
    /// Each connected component is merged into a single node, then components
    /// are combined by outer product. An empty network evaluates to 1.
    pub fn contract_all(&self) -> Result<ArrayTensor> {
        let mut work = self.clone();
        let mut finals = Vec::new();
        for component in self.connected_components() {
            let mut current = component[0];
            loop {
                let next = work.internal_connected(current)?.into_iter().next();
                match next {
                    Some(m) => current = work.merge_nodes(current, m)?,
                    None => break,
                }
            }
            finals.push(current);
        }

        let mut result = ArrayTensor::from_scalar(1.0);
        let mut order: Vec<BucketId> = Vec::new();
        for n in finals {
            let node = work.node(n)?;
            result = result.outer(&node.tensor);
            order.extend(node.buckets.iter().copied());
        }
        let perm = work
            .external
            .iter()
            .map(|b| {
                order.iter().position(|x| x == b).ok_or_else(|| {
                    NetworkError::Inconsistent(format!("external bucket {b} not on any node"))
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        result.permute(&perm).context("contract_all: final permutation")
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Verify every bookkeeping invariant of the network.
    ///
    /// # Errors
    /// Returns [`NetworkError::Inconsistent`] describing the first violation.
    pub fn check(&self) -> Result<()> {
        let fail = |msg: String| -> Result<()> { Err(NetworkError::Inconsistent(msg).into()) };

        let mut seen = 0usize;
        for n in self.graph.node_indices() {
            let node = &self.graph[n];
            if node.tensor.rank() != node.buckets.len() {
                return fail(format!(
                    "node {n:?} has rank {} but {} buckets",
                    node.tensor.rank(),
                    node.buckets.len()
                ));
            }
            for (pos, id) in node.buckets.iter().enumerate() {
                match self.buckets.get(id) {
                    Some(b) if b.node == n && b.position == pos => {}
                    _ => return fail(format!("bucket {id} does not point back to node {n:?}")),
                }
            }
            seen += node.buckets.len();
        }
        if seen != self.buckets.len() {
            return fail(format!(
                "{} buckets registered but {seen} held by nodes",
                self.buckets.len()
            ));
        }

        for (&id, bucket) in &self.buckets {
            let Some(e) = bucket.link else { continue };
            let Some(link) = self.graph.edge_weight(e) else {
                return fail(format!("bucket {id} refers to missing link {e:?}"));
            };
            let Some(other) = link.other(id) else {
                return fail(format!("link {e:?} does not contain bucket {id}"));
            };
            let Some(other_bucket) = self.buckets.get(&other) else {
                return fail(format!("link {e:?} refers to missing bucket {other}"));
            };
            if other_bucket.link != Some(e) {
                return fail(format!("bucket {other} is not attached to link {e:?}"));
            }
            if other_bucket.node == bucket.node {
                return fail(format!("link {e:?} joins node {:?} to itself", bucket.node));
            }
            if self.bucket_dim(id)? != self.bucket_dim(other)? {
                return fail(format!("link {e:?} joins buckets of different width"));
            }
        }

        let unlinked: BTreeSet<BucketId> = self
            .buckets
            .iter()
            .filter(|(_, b)| b.link.is_none())
            .map(|(&id, _)| id)
            .collect();
        let external: BTreeSet<BucketId> = self.external.iter().copied().collect();
        if external.len() != self.external.len() {
            return fail("external order lists a bucket twice".into());
        }
        if unlinked != external {
            return fail("external order does not match the unlinked buckets".into());
        }
        Ok(())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Network: {} nodes, {} links, shape {:?}, size {}",
            self.node_count(),
            self.link_count(),
            self.shape(),
            self.total_size()
        )?;
        for n in self.graph.node_indices() {
            let node = &self.graph[n];
            let labels: Vec<String> = node
                .buckets
                .iter()
                .map(|b| match self.buckets.get(b).and_then(|bk| bk.link) {
                    Some(_) => format!("{b}*"),
                    None => b.to_string(),
                })
                .collect();
            writeln!(
                f,
                "  {:?}: dims {:?} buckets [{}]",
                n,
                node.tensor.dims(),
                labels.join(", ")
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
