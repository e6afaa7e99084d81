//! Tree Tensor: a network-backed tensor whose topology is kept cycle-free.
//!
//! Contraction and tracing may create cycles; loop elimination runs before
//! they return so the tree invariant holds after every public operation.

mod contraction;
mod environment_cut;
mod loops;
mod optimize;
mod simplify;
mod utility_cut;

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result};
use tnr_core::ArrayTensor;

use crate::diagnostics::{Diagnostics, NoDiagnostics};
use crate::error::TreeTensorError;
use crate::network::{BucketId, Network};
use crate::options::TreeTensorOptions;

pub use environment_cut::{artificial_cut, EnvironmentCut, LoopEnvironment};
pub use loops::LoopCutter;
pub use optimize::OptimizeReport;
pub use utility_cut::UtilityGuidedCut;

pub(crate) use loops::eliminate_loops;
pub(crate) use simplify::simplify;

/// Tensor represented by an acyclic network of [`ArrayTensor`] nodes.
///
/// # Invariants
///
/// - The network is a forest (cyclomatic number zero)
/// - The external bucket order of the network defines [`TreeTensor::shape`]
#[derive(Debug, Clone)]
pub struct TreeTensor {
    pub(crate) network: Network,
    pub(crate) options: TreeTensorOptions,
    /// Buckets of links that link optimization has already visited.
    pub(crate) optimized: BTreeSet<BucketId>,
}

impl TreeTensor {
    /// Create an empty tree tensor, which represents the scalar 1.
    pub fn new(options: TreeTensorOptions) -> Self {
        Self {
            network: Network::new(),
            options,
            optimized: BTreeSet::new(),
        }
    }

    /// Wrap a dense tensor as a single-node tree.
    pub fn from_array(array: ArrayTensor, options: TreeTensorOptions) -> Self {
        let mut tree = Self::new(options);
        tree.network.add_node(array);
        tree
    }

    /// Wrap an arbitrary network, eliminating its loops first.
    ///
    /// # Errors
    /// Fails if the network is inconsistent or loop elimination cannot finish.
    pub fn from_network(network: Network, options: TreeTensorOptions) -> Result<Self> {
        Self::from_network_with(network, options, &mut NoDiagnostics)
    }

    /// [`TreeTensor::from_network`] reporting to `diag`.
    pub fn from_network_with(
        network: Network,
        options: TreeTensorOptions,
        diag: &mut dyn Diagnostics,
    ) -> Result<Self> {
        network.check().context("from_network: input network")?;
        let mut tree = Self {
            network,
            options,
            optimized: BTreeSet::new(),
        };
        let rank = tree.rank();
        tree.restore_invariants(rank, diag)?;
        Ok(tree)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Widths of the external indices.
    pub fn shape(&self) -> Vec<usize> {
        self.network.shape()
    }

    pub fn rank(&self) -> usize {
        self.network.external_buckets().len()
    }

    /// Number of stored elements across all nodes.
    pub fn size(&self) -> usize {
        self.network.total_size()
    }

    /// Accuracy target applied to each local truncation.
    pub fn accuracy(&self) -> f64 {
        self.options.accuracy()
    }

    pub fn options(&self) -> &TreeTensorOptions {
        &self.options
    }

    /// The underlying network.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// External bucket ids, in index order.
    pub fn external_buckets(&self) -> &[BucketId] {
        self.network.external_buckets()
    }

    /// Materialize the dense tensor, scale included, in external index order.
    pub fn array(&self) -> Result<ArrayTensor> {
        self.network.contract_all().context("array: contracting tree")
    }

    /// Natural log of the represented scalar; the tree must have rank zero.
    pub fn scalar_log(&self) -> Result<f64> {
        Ok(self.array()?.scalar_log()?)
    }

    /// Merge every rank-1 and rank-2 node into a neighbour and fuse parallel links.
    ///
    /// Returns the number of merges performed.
    pub fn contract_rank2(&mut self) -> Result<usize> {
        let merges = simplify(&mut self.network, &mut NoDiagnostics)?;
        self.check()?;
        Ok(merges)
    }

    /// Verify network consistency and acyclicity.
    pub fn check(&self) -> Result<()> {
        self.network.check()?;
        let cycles = self.network.cyclomatic_number();
        if cycles != 0 {
            return Err(TreeTensorError::Cyclic(cycles).into());
        }
        Ok(())
    }

    /// Run loop elimination and verify every invariant, including the rank.
    pub(crate) fn restore_invariants(
        &mut self,
        expected_rank: usize,
        diag: &mut dyn Diagnostics,
    ) -> Result<()> {
        eliminate_loops(&mut self.network, &self.options, diag)?;
        let actual = self.rank();
        if actual != expected_rank {
            return Err(TreeTensorError::RankMismatch {
                expected: expected_rank,
                actual,
            }
            .into());
        }
        self.optimized
            .retain(|b| self.network.bucket(*b).is_ok_and(|bk| bk.link().is_some()));
        self.check()
    }

    /// Resolve external positions to bucket ids, rejecting out-of-range and repeated positions.
    pub(crate) fn buckets_at(&self, positions: &[usize]) -> Result<Vec<BucketId>> {
        let external = self.network.external_buckets();
        let mut seen = BTreeSet::new();
        positions
            .iter()
            .map(|&p| -> Result<BucketId> {
                if !seen.insert(p) {
                    return Err(TreeTensorError::IndexReused(p).into());
                }
                external.get(p).copied().ok_or_else(|| {
                    TreeTensorError::IndexOutOfRange {
                        index: p,
                        rank: external.len(),
                    }
                    .into()
                })
            })
            .collect()
    }
}

impl fmt::Display for TreeTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "TreeTensor: shape {:?}, accuracy {:e}",
            self.shape(),
            self.accuracy()
        )?;
        write!(f, "{}", self.network)
    }
}

#[cfg(test)]
mod tests;
