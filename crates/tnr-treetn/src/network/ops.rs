//! Structural edits: link, merge, split, unlink, cut and trace.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use anyhow::{Context, Result};
use log::debug;
use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use tnr_core::{ArrayTensor, TruncationParams};

use super::{BucketId, Network, NodeSpec};
use crate::error::NetworkError;

/// Result of [`Network::split_node`].
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    /// Node holding the requested buckets plus the new bond bucket (last axis).
    pub left: NodeIndex,
    /// Node holding the remaining buckets, new bond bucket first.
    pub right: NodeIndex,
    /// The new link between `left` and `right`.
    pub link: EdgeIndex,
    /// Width of the new link.
    pub bond_dim: usize,
    /// Relative weight discarded by truncation.
    pub discarded: f64,
}

impl Network {
    /// Link two external buckets on different nodes.
    ///
    /// Both buckets leave the external order.
    ///
    /// # Errors
    /// - [`NetworkError::BucketLinked`] if either bucket is already linked
    /// - [`NetworkError::SelfLoop`] if both buckets sit on the same node
    /// - [`NetworkError::DimensionMismatch`] if the widths differ
    pub fn link(&mut self, b1: BucketId, b2: BucketId) -> Result<EdgeIndex> {
        for b in [b1, b2] {
            if self.bucket(b)?.link.is_some() {
                return Err(NetworkError::BucketLinked(b).into());
            }
        }
        if self.node_of(b1)? == self.node_of(b2)? {
            return Err(NetworkError::SelfLoop(b1, b2).into());
        }
        let (d1, d2) = (self.bucket_dim(b1)?, self.bucket_dim(b2)?);
        if d1 != d2 {
            return Err(NetworkError::DimensionMismatch { b1, d1, b2, d2 }.into());
        }
        let edge = self.connect(b1, b2)?;
        self.external.retain(|b| *b != b1 && *b != b2);
        Ok(edge)
    }

    /// Contract two linked nodes without modifying the network.
    ///
    /// Returns the merged tensor and its bucket list: the unlinked-to-each-other
    /// buckets of `a` in order, followed by those of `b`. All links between the
    /// two nodes are summed over.
    pub fn dummy_merge_nodes(
        &self,
        a: NodeIndex,
        b: NodeIndex,
    ) -> Result<(ArrayTensor, Vec<BucketId>)> {
        let shared = self.links_between(a, b);
        if shared.is_empty() {
            return Err(NetworkError::NotConnected(a, b).into());
        }
        let node_a = self.node(a)?;
        let node_b = self.node(b)?;

        let mut axes_a = Vec::with_capacity(shared.len());
        let mut axes_b = Vec::with_capacity(shared.len());
        let mut consumed = BTreeSet::new();
        for e in shared {
            let link = self.link_weight(e)?;
            let (on_a, on_b) = if self.node_of(link.bucket1)? == a {
                (link.bucket1, link.bucket2)
            } else {
                (link.bucket2, link.bucket1)
            };
            axes_a.push(self.bucket(on_a)?.position);
            axes_b.push(self.bucket(on_b)?.position);
            consumed.insert(on_a);
            consumed.insert(on_b);
        }

        let tensor = node_a
            .tensor
            .contract(&axes_a, &node_b.tensor, &axes_b)
            .with_context(|| format!("dummy_merge_nodes: contracting {a:?} with {b:?}"))?;
        let buckets = node_a
            .buckets
            .iter()
            .chain(node_b.buckets.iter())
            .copied()
            .filter(|id| !consumed.contains(id))
            .collect();
        Ok((tensor, buckets))
    }

    /// Contract two linked nodes into one, summing over every link between them.
    ///
    /// Links from either node to third nodes carry over to the merged node.
    /// Returns the merged node's index.
    pub fn merge_nodes(&mut self, a: NodeIndex, b: NodeIndex) -> Result<NodeIndex> {
        let (tensor, buckets) = self.dummy_merge_nodes(a, b)?;
        let created = self.replace_nodes(&[a, b], vec![NodeSpec { tensor, buckets }], &[])?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| NetworkError::Inconsistent("merge produced no node".into()).into())
    }

    /// Split a node by truncated SVD along `left | rest`.
    ///
    /// The buckets in `left` keep their identity and move to the new left node;
    /// the rest move to the right node. A fresh link of the kept bond width
    /// joins the two.
    ///
    /// # Errors
    /// [`NetworkError::InvalidPartition`] unless both sides hold at least one
    /// bucket of `node`.
    pub fn split_node(
        &mut self,
        node: NodeIndex,
        left: &[BucketId],
        params: &TruncationParams,
    ) -> Result<SplitOutcome> {
        let current = self.node(node)?;
        let mut left_axes = Vec::with_capacity(left.len());
        for id in left {
            let bucket = self.bucket(*id)?;
            if bucket.node != node || left_axes.contains(&bucket.position) {
                return Err(NetworkError::InvalidPartition(node).into());
            }
            left_axes.push(bucket.position);
        }
        if left_axes.is_empty() || left_axes.len() >= current.rank() {
            return Err(NetworkError::InvalidPartition(node).into());
        }
        let right: Vec<BucketId> = current
            .buckets
            .iter()
            .copied()
            .filter(|id| !left.contains(id))
            .collect();

        let split = current
            .tensor
            .svd_split(&left_axes, params)
            .with_context(|| format!("split_node: SVD of {node:?}"))?;
        let bond_dim = split.bond_dim();
        let discarded = split.discarded;

        let bond_left = self.fresh_bucket();
        let bond_right = self.fresh_bucket();
        let mut left_buckets = left.to_vec();
        left_buckets.push(bond_left);
        let mut right_buckets = vec![bond_right];
        right_buckets.extend(right);

        let created = self.replace_nodes(
            &[node],
            vec![
                NodeSpec {
                    tensor: split.left,
                    buckets: left_buckets,
                },
                NodeSpec {
                    tensor: split.right,
                    buckets: right_buckets,
                },
            ],
            &[(bond_left, bond_right)],
        )?;
        let link = self
            .bucket(bond_left)?
            .link
            .ok_or_else(|| NetworkError::Inconsistent("split bond was not linked".into()))?;
        debug!(bond_dim, discarded; "split node");
        Ok(SplitOutcome {
            left: created[0],
            right: created[1],
            link,
            bond_dim,
            discarded,
        })
    }

    /// Multiply one axis by `matrix[new, old]`, in place.
    ///
    /// The bucket keeps its id and position. A linked bucket may only be
    /// mapped to its own width.
    pub(crate) fn transform_bucket(&mut self, id: BucketId, matrix: &ArrayTensor) -> Result<()> {
        let bucket = self.bucket(id)?;
        let (n, pos, linked) = (bucket.node, bucket.position, bucket.link.is_some());
        let tensor = self.tensor(n)?;
        let rank = tensor.rank();
        let shape_ok = matrix.rank() == 2
            && matrix.dims()[1] == tensor.dims()[pos]
            && (!linked || matrix.dims()[0] == matrix.dims()[1]);
        if !shape_ok {
            return Err(NetworkError::Inconsistent(format!(
                "cannot map bucket {id} of width {} through a {:?} matrix",
                tensor.dims()[pos],
                matrix.dims()
            ))
            .into());
        }
        // the new axis comes out last; move it back to `pos`
        let product = tensor.contract(&[pos], matrix, &[1])?;
        let perm: Vec<usize> = (0..rank)
            .map(|j| match j.cmp(&pos) {
                Ordering::Less => j,
                Ordering::Equal => rank - 1,
                Ordering::Greater => j - 1,
            })
            .collect();
        let updated = product.permute(&perm)?;
        let node = self
            .graph
            .node_weight_mut(n)
            .ok_or(NetworkError::NodeNotFound(n))?;
        node.tensor = updated;
        Ok(())
    }

    /// Remove a link, turning its two buckets into external indices.
    ///
    /// The buckets keep their ids and are appended to the external order.
    pub fn remove_link(&mut self, e: EdgeIndex) -> Result<(BucketId, BucketId)> {
        let link = self
            .graph
            .remove_edge(e)
            .ok_or(NetworkError::LinkNotFound(e))?;
        for b in [link.bucket1, link.bucket2] {
            if let Some(bucket) = self.buckets.get_mut(&b) {
                bucket.link = None;
            }
            self.external.push(b);
        }
        Ok((link.bucket1, link.bucket2))
    }

    /// Sever every link of width one.
    ///
    /// A width-one link is an outer product, so dropping it and the two
    /// singleton axes is exact. Returns the number of links removed.
    pub fn cut_links(&mut self) -> Result<usize> {
        let mut trivial = Vec::new();
        for e in self.links() {
            if self.link_dim(e)? == 1 {
                trivial.push(e);
            }
        }
        for &e in &trivial {
            self.sever_unit_link(e)?;
        }
        if !trivial.is_empty() {
            debug!(count = trivial.len(); "cut width-one links");
        }
        Ok(trivial.len())
    }

    /// Drop a width-one link together with its two singleton axes.
    pub(crate) fn sever_unit_link(&mut self, e: EdgeIndex) -> Result<()> {
        let link = *self.link_weight(e)?;
        if self.bucket_dim(link.bucket1)? != 1 {
            return Err(NetworkError::Inconsistent(format!("link {e:?} has width above one")).into());
        }
        self.graph.remove_edge(e);
        for b in [link.bucket1, link.bucket2] {
            let n = self.node_of(b)?;
            let node = self.node(n)?;
            let dims: Vec<usize> = node
                .buckets
                .iter()
                .zip(node.tensor.dims())
                .filter(|(id, _)| **id != b)
                .map(|(_, &d)| d)
                .collect();
            let tensor = node.tensor.reshape(dims)?;
            self.drop_buckets_in_place(n, tensor, &[b])?;
        }
        Ok(())
    }

    /// Replace a node's tensor after removing some of its buckets.
    ///
    /// `tensor` must list the node's remaining buckets in their existing order.
    fn drop_buckets_in_place(
        &mut self,
        n: NodeIndex,
        tensor: ArrayTensor,
        removed: &[BucketId],
    ) -> Result<()> {
        let node = self
            .graph
            .node_weight_mut(n)
            .ok_or(NetworkError::NodeNotFound(n))?;
        node.buckets.retain(|b| !removed.contains(b));
        if node.buckets.len() != tensor.rank() {
            return Err(NetworkError::Inconsistent(format!(
                "node {n:?} keeps {} buckets for a rank-{} tensor",
                node.buckets.len(),
                tensor.rank()
            ))
            .into());
        }
        node.tensor = tensor;
        let remaining = node.buckets.clone();
        for b in removed {
            self.buckets.remove(b);
            self.external.retain(|x| x != b);
        }
        for (position, id) in remaining.into_iter().enumerate() {
            if let Some(bucket) = self.buckets.get_mut(&id) {
                bucket.position = position;
            }
        }
        Ok(())
    }

    /// Fold every rank-0 node into another node of the network.
    ///
    /// Scalar nodes are left over when cuts isolate a node; multiplying them
    /// into a neighbour keeps the node count meaningful. Returns how many were folded.
    pub fn fold_scalar_nodes(&mut self) -> Result<usize> {
        let scalars: Vec<NodeIndex> = self
            .node_indices()
            .into_iter()
            .filter(|&n| self.graph[n].buckets.is_empty())
            .collect();
        let mut folded = 0;
        for s in scalars {
            let Some(target) = self.node_indices().into_iter().find(|&n| n != s) else {
                break;
            };
            let scalar = self
                .graph
                .remove_node(s)
                .ok_or(NetworkError::NodeNotFound(s))?;
            let node = self
                .graph
                .node_weight_mut(target)
                .ok_or(NetworkError::NodeNotFound(target))?;
            node.tensor = scalar.tensor.outer(&node.tensor);
            folded += 1;
        }
        Ok(folded)
    }

    /// Trace two external buckets against each other.
    ///
    /// On the same node the two axes are summed along their diagonal and both
    /// buckets disappear; on different nodes the buckets are linked.
    ///
    /// # Errors
    /// - [`NetworkError::BucketLinked`] if either bucket is already linked
    /// - [`NetworkError::DimensionMismatch`] if the widths differ
    pub fn trace(&mut self, b1: BucketId, b2: BucketId) -> Result<()> {
        let n1 = self.node_of(b1)?;
        let n2 = self.node_of(b2)?;
        if n1 != n2 {
            self.link(b1, b2)?;
            return Ok(());
        }
        for b in [b1, b2] {
            if self.bucket(b)?.link.is_some() {
                return Err(NetworkError::BucketLinked(b).into());
            }
        }
        let (d1, d2) = (self.bucket_dim(b1)?, self.bucket_dim(b2)?);
        if d1 != d2 {
            return Err(NetworkError::DimensionMismatch { b1, d1, b2, d2 }.into());
        }
        let (p1, p2) = (self.bucket(b1)?.position, self.bucket(b2)?.position);
        let tensor = self.tensor(n1)?.trace(p1, p2)?;
        self.drop_buckets_in_place(n1, tensor, &[b1, b2])
    }
}
