//! Link optimization: re-split adjacent node pairs along minimum-entropy bipartitions.

use anyhow::{Context, Result};
use log::{debug, info};
use tnr_core::{canonical_side, min_entropy_bipartition};

use super::TreeTensor;
use crate::diagnostics::{Diagnostics, NoDiagnostics};
use crate::network::BucketId;

/// Stored sizes around one optimization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeReport {
    pub size_before: usize,
    pub size_after: usize,
    /// Number of committed merge + re-split steps.
    pub resplits: usize,
    /// Number of links severed because the best split had width one.
    pub severed: usize,
}

impl TreeTensor {
    /// Reduce stored size by re-splitting linked node pairs.
    ///
    /// See [`TreeTensor::optimize_with`].
    pub fn optimize(&mut self) -> Result<OptimizeReport> {
        self.optimize_with(&mut NoDiagnostics)
    }

    /// Reduce stored size by re-splitting linked node pairs.
    ///
    /// Every link not yet marked optimized is visited. When both endpoints have
    /// rank three or more, the two nodes are merged virtually and the
    /// minimum-entropy bipartition of the merged tensor is computed (keeping a
    /// rank-3 endpoint's legs together when entropies tie). If it differs from
    /// the current split and re-splitting along it stores fewer elements, the
    /// pair is merged and re-split; the touched buckets are then reconsidered.
    /// A new link of width one is severed. The total stored size never grows.
    pub fn optimize_with(&mut self, diag: &mut dyn Diagnostics) -> Result<OptimizeReport> {
        let size_before = self.size();
        let mut resplits = 0;
        let mut severed = 0;

        loop {
            let pending = self
                .network
                .internal_buckets()
                .into_iter()
                .find(|b| !self.optimized.contains(b));
            let Some(b1) = pending else { break };
            let Some(b2) = self.network.partner(b1)? else {
                self.optimized.insert(b1);
                continue;
            };
            let n1 = self.network.node_of(b1)?;
            let n2 = self.network.node_of(b2)?;
            let (r1, r2) = (self.network.node(n1)?.rank(), self.network.node(n2)?.rank());
            if r1 < 3 || r2 < 3 {
                self.mark(&[b1, b2]);
                continue;
            }

            let (merged, buckets) = self.network.dummy_merge_nodes(n1, n2)?;
            let rank = merged.rank();
            // n1's remaining legs come first in the merged tensor
            let n1_legs = r1 - self.network.links_between(n1, n2).len();
            let current: Vec<usize> = (0..n1_legs).collect();
            let preferred: Option<Vec<usize>> = if r1 == 3 {
                Some(current.clone())
            } else if r2 == 3 {
                Some((n1_legs..rank).collect())
            } else {
                None
            };
            let best = min_entropy_bipartition(&merged, preferred.as_deref())
                .context("optimize: bipartition search")?;
            if best == canonical_side(&current, rank) {
                self.mark(&[b1, b2]);
                continue;
            }

            let split = merged.svd_split(&best, &self.options.truncation)?;
            let old_size = self.network.tensor(n1)?.size() + self.network.tensor(n2)?.size();
            let new_size = split.left.size() + split.right.size();
            if new_size >= old_size {
                self.mark(&[b1, b2]);
                continue;
            }

            let left: Vec<BucketId> = best.iter().map(|&axis| buckets[axis]).collect();
            let host = self.network.merge_nodes(n1, n2)?;
            let outcome = self.network.split_node(host, &left, &self.options.truncation)?;
            diag.on_truncation(outcome.discarded);
            resplits += 1;
            debug!(old_size, new_size, bond_dim = outcome.bond_dim; "optimizer re-split link");

            for n in [outcome.left, outcome.right] {
                for b in self.network.node(n)?.buckets() {
                    self.optimized.remove(b);
                    if let Some(p) = self.network.partner(*b)? {
                        self.optimized.remove(&p);
                    }
                }
            }
            if outcome.bond_dim == 1 {
                self.network.sever_unit_link(outcome.link)?;
                severed += 1;
                debug!("optimizer cut a link");
            } else {
                let link = *self.network.link_weight(outcome.link)?;
                self.mark(&[link.bucket1, link.bucket2]);
            }
        }

        let size_after = self.size();
        info!(
            size_before,
            size_after,
            nodes = self.network.node_count(),
            resplits;
            "link optimization finished"
        );
        diag.on_optimize(size_before, size_after);
        self.check()?;
        Ok(OptimizeReport {
            size_before,
            size_after,
            resplits,
            severed,
        })
    }

    fn mark(&mut self, buckets: &[BucketId]) {
        self.optimized.extend(buckets.iter().copied());
    }
}
