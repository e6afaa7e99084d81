//! Contraction, partial trace and index flattening for TreeTensor.

use anyhow::{Context, Result};
use log::debug;
use petgraph::stable_graph::NodeIndex;

use super::TreeTensor;
use crate::diagnostics::{Diagnostics, NoDiagnostics};
use crate::error::{NetworkError, TreeTensorError};
use crate::network::{BucketId, Network, NodeSpec};

impl TreeTensor {
    /// Contract external indices `ind` of `self` with `other_ind` of `other`.
    ///
    /// Neither operand is modified. The result's indices are the remaining
    /// indices of `self` followed by the remaining indices of `other`, and its
    /// options are those of `self`.
    ///
    /// # Arguments
    /// * `ind` - External positions of `self`
    /// * `other` - Tensor to contract with
    /// * `other_ind` - External positions of `other`, paired with `ind`
    ///
    /// # Errors
    /// - [`TreeTensorError::IndexCountMismatch`] if the lists differ in length
    /// - [`TreeTensorError::IndexReused`] if a position is listed twice
    /// - [`TreeTensorError::DimensionMismatch`] if paired widths differ
    /// - Loop elimination failures
    pub fn contract(&self, ind: &[usize], other: &TreeTensor, other_ind: &[usize]) -> Result<TreeTensor> {
        self.contract_with(ind, other, other_ind, &mut NoDiagnostics)
    }

    /// [`TreeTensor::contract`] reporting to `diag`.
    pub fn contract_with(
        &self,
        ind: &[usize],
        other: &TreeTensor,
        other_ind: &[usize],
        diag: &mut dyn Diagnostics,
    ) -> Result<TreeTensor> {
        if ind.len() != other_ind.len() {
            return Err(TreeTensorError::IndexCountMismatch(ind.len(), other_ind.len()).into());
        }
        let own = self.buckets_at(ind)?;
        let theirs = other.buckets_at(other_ind)?;
        let (self_shape, other_shape) = (self.shape(), other.shape());
        for (&i, &j) in ind.iter().zip(other_ind) {
            if self_shape[i] != other_shape[j] {
                return Err(TreeTensorError::DimensionMismatch {
                    index: i,
                    dim: self_shape[i],
                    other_index: j,
                    other_dim: other_shape[j],
                }
                .into());
            }
        }

        let mut result = TreeTensor::new(self.options);
        result.network = self.network.clone();
        let rename = result
            .network
            .absorb(other.network.clone())
            .context("contract: absorbing other network")?;
        for (a, b) in own.iter().zip(&theirs) {
            let b = rename.get(b).copied().ok_or(NetworkError::BucketNotFound(*b))?;
            result.network.link(*a, b)?;
        }
        debug!(
            pairs = ind.len(),
            nodes = result.network.node_count(),
            cycles = result.network.cyclomatic_number();
            "contracted tree tensors"
        );

        let expected = self.rank() + other.rank() - 2 * ind.len();
        result
            .restore_invariants(expected, diag)
            .context("contract: restoring tree invariant")?;
        Ok(result)
    }

    /// Trace each index of `ind0` against the matching index of `ind1`.
    ///
    /// Positions refer to the indices before any pair is removed. The result
    /// keeps the remaining indices in their original relative order.
    ///
    /// # Errors
    /// - [`TreeTensorError::IndexCountMismatch`] if the lists differ in length
    /// - [`TreeTensorError::IndexReused`] if a position appears twice in either list
    /// - [`TreeTensorError::DimensionMismatch`] if paired widths differ
    pub fn trace(&self, ind0: &[usize], ind1: &[usize]) -> Result<TreeTensor> {
        self.trace_with(ind0, ind1, &mut NoDiagnostics)
    }

    /// [`TreeTensor::trace`] reporting to `diag`.
    pub fn trace_with(
        &self,
        ind0: &[usize],
        ind1: &[usize],
        diag: &mut dyn Diagnostics,
    ) -> Result<TreeTensor> {
        if ind0.len() != ind1.len() {
            return Err(TreeTensorError::IndexCountMismatch(ind0.len(), ind1.len()).into());
        }
        let all: Vec<usize> = ind0.iter().chain(ind1).copied().collect();
        let buckets = self.buckets_at(&all)?;
        let shape = self.shape();
        for (&i, &j) in ind0.iter().zip(ind1) {
            if shape[i] != shape[j] {
                return Err(TreeTensorError::DimensionMismatch {
                    index: i,
                    dim: shape[i],
                    other_index: j,
                    other_dim: shape[j],
                }
                .into());
            }
        }

        let mut result = self.clone();
        let (first, second) = buckets.split_at(ind0.len());
        for (&a, &b) in first.iter().zip(second) {
            result.network.trace(a, b)?;
        }
        let expected = self.rank() - all.len();
        result
            .restore_invariants(expected, diag)
            .context("trace: restoring tree invariant")?;
        Ok(result)
    }

    /// Combine the listed external indices into one index.
    ///
    /// The combined index is row-major over `indices` in the given order (the
    /// first listed index varies slowest) and takes the position of the first
    /// listed index; the other listed positions are removed.
    ///
    /// # Errors
    /// [`TreeTensorError::FlattenTooFew`] for fewer than two indices, plus the
    /// index validation errors of [`TreeTensor::contract`].
    pub fn flatten(&self, indices: &[usize]) -> Result<TreeTensor> {
        if indices.len() < 2 {
            return Err(TreeTensorError::FlattenTooFew(indices.len()).into());
        }
        let listed = self.buckets_at(indices)?;
        let mut result = self.clone();
        let net = &mut result.network;

        // gather every listed bucket onto one node
        let mut host = net.node_of(listed[0])?;
        for &b in &listed[1..] {
            let owner = net.node_of(b)?;
            if owner == host {
                continue;
            }
            host = match net.shortest_path(host, owner)? {
                Some(path) => {
                    let mut current = host;
                    for &next in &path[1..] {
                        current = net.merge_nodes(current, next)?;
                    }
                    current
                }
                None => join_components(net, host, owner)?,
            };
        }

        let node = net.node(host)?;
        let others: Vec<BucketId> = node
            .buckets()
            .iter()
            .copied()
            .filter(|b| !listed.contains(b))
            .collect();
        let mut perm = Vec::with_capacity(node.rank());
        for b in others.iter().chain(&listed) {
            perm.push(net.bucket(*b)?.position());
        }
        let permuted = node.tensor().permute(&perm)?;
        let mut dims: Vec<usize> = permuted.dims()[..others.len()].to_vec();
        dims.push(permuted.dims()[others.len()..].iter().product());
        let tensor = permuted.reshape(dims)?;

        let combined = net.fresh_bucket();
        let mut buckets = others;
        buckets.push(combined);
        let order: Vec<BucketId> = net
            .external_buckets()
            .iter()
            .filter_map(|&b| {
                if b == listed[0] {
                    Some(combined)
                } else if listed.contains(&b) {
                    None
                } else {
                    Some(b)
                }
            })
            .collect();
        net.replace_nodes(&[host], vec![NodeSpec { tensor, buckets }], &[])?;
        net.push_external(combined);
        net.set_external_order(order)?;

        let expected = self.rank() + 1 - indices.len();
        result.restore_invariants(expected, &mut NoDiagnostics)?;
        Ok(result)
    }
}

/// Fuse two nodes of different components by outer product.
fn join_components(
    net: &mut Network,
    a: NodeIndex,
    b: NodeIndex,
) -> Result<NodeIndex> {
    let (na, nb) = (net.node(a)?, net.node(b)?);
    let tensor = na.tensor().outer(nb.tensor());
    let buckets: Vec<BucketId> = na.buckets().iter().chain(nb.buckets()).copied().collect();
    let created = net.replace_nodes(&[a, b], vec![NodeSpec { tensor, buckets }], &[])?;
    created
        .into_iter()
        .next()
        .ok_or_else(|| NetworkError::Inconsistent("outer product produced no node".into()).into())
}
