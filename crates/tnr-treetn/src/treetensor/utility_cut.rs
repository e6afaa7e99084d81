//! Utility-guided loop shrinking.
//!
//! A cycle is tracked as its ring of links (bucket pairs), which survive the
//! merges performed along the way. Each move acts on two adjacent ring nodes:
//!
//! - merge: contract the pair into one node
//! - swap: contract the pair, then re-split so that both ring-neighbour links
//!   land on one factor and the other legs hang off it
//!
//! Either move shortens the ring by one. The move with the highest cost
//! utility is applied until the ring is a double link, which simplification
//! fuses away.

use anyhow::{Context, Result};
use log::debug;
use petgraph::stable_graph::NodeIndex;
use tnr_core::TruncationParams;

use super::loops::LoopCutter;
use super::simplify;
use crate::diagnostics::Diagnostics;
use crate::error::NetworkError;
use crate::network::{BucketId, Network};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Move {
    Merge,
    Swap { keep: [BucketId; 2] },
}

/// Candidate move on the ring link `(u, v)`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    u: NodeIndex,
    v: NodeIndex,
    action: Move,
    utility: f64,
    discarded: f64,
}

/// Loop cutter that greedily applies the locally most useful merge or swap.
#[derive(Debug, Clone)]
pub struct UtilityGuidedCut {
    /// Storage units charged per unit of discarded relative weight, scaled by
    /// the pair's size.
    pub error_weight: f64,
}

impl Default for UtilityGuidedCut {
    fn default() -> Self {
        Self { error_weight: 1.0 }
    }
}

impl UtilityGuidedCut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cost utility of replacing storage `before` by `after` at truncation error `discarded`.
    pub fn utility(&self, before: usize, after: usize, discarded: f64) -> f64 {
        before as f64 - after as f64 - self.error_weight * discarded * before as f64
    }

    fn best_move(
        &self,
        network: &Network,
        ring: &[(BucketId, BucketId)],
        truncation: &TruncationParams,
    ) -> Result<Option<Candidate>> {
        let len = ring.len();
        let mut best: Option<Candidate> = None;
        for i in 0..len {
            let u = network.node_of(ring[i].0)?;
            let v = network.node_of(ring[i].1)?;
            if u == v {
                continue;
            }
            let keep = [ring[(i + len - 1) % len].1, ring[(i + 1) % len].0];
            let before = network.tensor(u)?.size() + network.tensor(v)?.size();
            let (merged, buckets) = network.dummy_merge_nodes(u, v)?;

            let mut candidates = vec![Candidate {
                u,
                v,
                action: Move::Merge,
                utility: self.utility(before, merged.size(), 0.0),
                discarded: 0.0,
            }];
            let keep_axes: Vec<usize> = buckets
                .iter()
                .enumerate()
                .filter(|(_, b)| keep.contains(b))
                .map(|(axis, _)| axis)
                .collect();
            if keep_axes.len() == 2 && buckets.len() > 2 {
                let split = merged.svd_split(&keep_axes, truncation)?;
                let after = split.left.size() + split.right.size();
                candidates.push(Candidate {
                    u,
                    v,
                    action: Move::Swap { keep },
                    utility: self.utility(before, after, split.discarded),
                    discarded: split.discarded,
                });
            }

            for c in candidates {
                let better = match &best {
                    None => true,
                    Some(b) => {
                        c.utility > b.utility || (c.utility == b.utility && c.discarded < b.discarded)
                    }
                };
                if better {
                    best = Some(c);
                }
            }
        }
        Ok(best)
    }
}

/// Links of `cycle` as bucket pairs, oriented along the cycle.
fn ring_of(network: &Network, cycle: &[NodeIndex]) -> Result<Vec<(BucketId, BucketId)>> {
    let k = cycle.len();
    let mut ring = Vec::with_capacity(k);
    for i in 0..k {
        let (a, b) = (cycle[i], cycle[(i + 1) % k]);
        let shared = network.links_between(a, b);
        // a 2-cycle uses both parallel links
        let e = *shared
            .get(if k == 2 { i } else { 0 })
            .ok_or(NetworkError::NotConnected(a, b))?;
        let link = network.link_weight(e)?;
        if network.node_of(link.bucket1)? == a {
            ring.push((link.bucket1, link.bucket2));
        } else {
            ring.push((link.bucket2, link.bucket1));
        }
    }
    Ok(ring)
}

/// Drop ring links that were contracted away.
fn prune_ring(network: &Network, ring: &mut Vec<(BucketId, BucketId)>) {
    ring.retain(|&(a, b)| matches!(network.partner(a), Ok(Some(p)) if p == b));
}

impl LoopCutter for UtilityGuidedCut {
    fn name(&self) -> &'static str {
        "utility"
    }

    fn cut(
        &mut self,
        network: &mut Network,
        cycle: &[NodeIndex],
        truncation: &TruncationParams,
        diag: &mut dyn Diagnostics,
    ) -> Result<()> {
        let mut ring = ring_of(network, cycle)?;
        diag.on_cut(cycle.len(), 1.0);

        loop {
            prune_ring(network, &mut ring);
            if ring.len() < 2 {
                break;
            }
            if ring.len() == 2 {
                let u = network.node_of(ring[0].0)?;
                let v = network.node_of(ring[0].1)?;
                network.merge_nodes(u, v)?;
                break;
            }

            let Some(best) = self.best_move(network, &ring, truncation)? else {
                break;
            };
            debug!(ring = ring.len(), utility = best.utility; "utility-guided move");
            let merged = network
                .merge_nodes(best.u, best.v)
                .context("utility-guided merge")?;
            if let Move::Swap { keep } = best.action {
                let outcome = network.split_node(merged, &keep, truncation)?;
                diag.on_truncation(outcome.discarded);
            }
            simplify(network, diag)?;
        }
        network.cut_links()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCounters;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tnr_core::ArrayTensor;

    #[test]
    fn test_utility_prefers_smaller_storage() {
        let cutter = UtilityGuidedCut::new();
        assert!(cutter.utility(100, 40, 0.0) > cutter.utility(100, 60, 0.0));
        assert!(cutter.utility(100, 40, 0.0) > cutter.utility(100, 40, 0.1));
    }

    #[test]
    fn test_ring_is_removed_exactly() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut net = Network::new();
        let nodes: Vec<NodeIndex> = (0..5)
            .map(|_| net.add_node(ArrayTensor::random(&mut rng, vec![2, 3, 2])))
            .collect();
        for i in 0..5 {
            let right = net.node(nodes[i]).unwrap().buckets()[2];
            let left = net.node(nodes[(i + 1) % 5]).unwrap().buckets()[0];
            net.link(right, left).unwrap();
        }
        let before = net.contract_all().unwrap();

        let mut diag = DiagnosticCounters::new();
        UtilityGuidedCut::new()
            .cut(&mut net, &nodes, &TruncationParams::new(), &mut diag)
            .unwrap();
        assert!(net.is_acyclic());
        net.check().unwrap();
        assert_eq!(diag.cuts, 1);

        let after = net.contract_all().unwrap();
        let scale = (after.log_scale() - before.log_scale()).exp();
        for (x, y) in after.data().iter().zip(before.data()) {
            assert_relative_eq!(x * scale, *y, epsilon = 1e-9);
        }
    }
}
