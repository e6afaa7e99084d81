//! Environment-weighted loop cutting.
//!
//! The environment of a loop is the rest of the network with its own cycles
//! artificially cut. It enters the rewrite twice:
//!
//! - every outward leg of the loop is weighted by the square root of the
//!   Gram matrix of the environment node it faces, so truncations measure the
//!   error the environment actually sees and directions it annihilates vanish
//! - each link removed from the environment multiplies a correction factor by
//!   its width; truncations inside the loop run at `rtol / correction`
//!
//! The weighted ring is then opened in place: its closing link is carried
//! around the cycle by merging the next node into the running node and
//! splitting off each node's own legs again.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use log::debug;
use petgraph::stable_graph::NodeIndex;
use tnr_core::{svd_row_major, ArrayTensor, TruncationParams, DEFAULT_RTOL};

use super::loops::LoopCutter;
use crate::diagnostics::Diagnostics;
use crate::error::NetworkError;
use crate::network::{BucketId, Network};

/// Acyclic environment of a set of nodes.
#[derive(Debug, Clone)]
pub struct LoopEnvironment {
    /// Copy of the network without the excluded nodes, made acyclic.
    pub network: Network,
    /// Product of the widths of the links removed to make `network` acyclic.
    pub correction: f64,
    /// For every outward leg of the excluded nodes, the environment bucket facing it.
    pub partners: Vec<(BucketId, BucketId)>,
}

/// Build the environment of `exclude`: everything else, with its cycles cut.
///
/// Legs of the excluded nodes that are external in `network` face an identity
/// node in the environment, so every leg has a partner.
pub fn artificial_cut(network: &Network, exclude: &BTreeSet<NodeIndex>) -> Result<LoopEnvironment> {
    let rest: BTreeSet<NodeIndex> = network
        .node_indices()
        .into_iter()
        .filter(|n| !exclude.contains(n))
        .collect();
    let (mut env, _) = network.copy_subset(&rest)?;

    let mut correction = 1.0;
    while let Some(cycle) = env.cycle_basis().into_iter().next() {
        let (first, last) = match (cycle.first(), cycle.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => break,
        };
        let link = env
            .links_between(last, first)
            .into_iter()
            .next()
            .ok_or(NetworkError::NotConnected(last, first))?;
        let dim = env.link_dim(link)?;
        env.remove_link(link)?;
        correction *= dim as f64;
    }

    let mut partners = Vec::new();
    for &n in exclude {
        for &b in network.node(n)?.buckets() {
            match network.partner(b)? {
                Some(p) if exclude.contains(&network.node_of(p)?) => {}
                Some(p) => partners.push((b, p)),
                None => {
                    let dim = network.bucket_dim(b)?;
                    let pad = env.add_node(ArrayTensor::identity(dim));
                    let facing = env.node(pad)?.buckets()[0];
                    partners.push((b, facing));
                }
            }
        }
    }
    for (leg, facing) in &partners {
        if env.bucket(*facing)?.link().is_some() {
            return Err(NetworkError::Inconsistent(format!(
                "environment bucket {facing} facing leg {leg} is linked"
            ))
            .into());
        }
    }

    Ok(LoopEnvironment {
        network: env,
        correction,
        partners,
    })
}

/// Square root of the Gram matrix an environment node presents to one leg.
#[derive(Debug, Clone)]
struct LegMetric {
    /// `[r, d]`; `weight^T weight` is the normalized Gram matrix.
    weight: ArrayTensor,
    /// `[d, r]`; `inverse * weight` projects onto the directions the node sees.
    inverse: ArrayTensor,
}

/// Metric of the leg facing `facing`, from the environment node owning it.
///
/// All other axes of that node are summed in the Gram matrix. Directions
/// whose relative weight is below `cutoff` are dropped, so `r` may be smaller
/// than the leg width `d` and the inverse amplifies by at most `1 / cutoff`.
fn leg_metric(env: &Network, facing: BucketId, cutoff: f64) -> Result<LegMetric> {
    let owner = env.node_of(facing)?;
    let axis = env.bucket(facing)?.position();
    let tensor = env.tensor(owner)?;
    let rest: Vec<usize> = (0..tensor.rank()).filter(|&a| a != axis).collect();
    let gram = if rest.is_empty() {
        tensor.outer(tensor)
    } else {
        tensor.contract(&rest, tensor, &rest)?
    };

    let d = gram.dims()[0];
    let svd = svd_row_major(gram.data(), d, d)?;
    let k = svd.full_rank();
    let top = svd.s.first().copied().unwrap_or(0.0);
    let cutoff = cutoff.max(f64::EPSILON);
    let kept: Vec<usize> = (0..k)
        .filter(|&a| top > 0.0 && (svd.s[a] / top).sqrt() >= cutoff)
        .collect();
    if kept.is_empty() {
        return Ok(LegMetric {
            weight: ArrayTensor::identity(d),
            inverse: ArrayTensor::identity(d),
        });
    }

    let r = kept.len();
    let roots: Vec<f64> = kept.iter().map(|&a| (svd.s[a] / top).sqrt()).collect();
    let mut weight = Vec::with_capacity(r * d);
    for (j, &a) in kept.iter().enumerate() {
        weight.extend((0..d).map(|i| roots[j] * svd.u[i * k + a]));
    }
    let mut inverse = Vec::with_capacity(d * r);
    for i in 0..d {
        inverse.extend(kept.iter().enumerate().map(|(j, &a)| svd.u[i * k + a] / roots[j]));
    }
    Ok(LegMetric {
        weight: ArrayTensor::new(vec![r, d], weight)?,
        inverse: ArrayTensor::new(vec![d, r], inverse)?,
    })
}

/// Default loop cutter: environment-weighted opening of the ring.
#[derive(Debug, Default, Clone)]
pub struct EnvironmentCut;

impl EnvironmentCut {
    pub fn new() -> Self {
        Self
    }
}

impl LoopCutter for EnvironmentCut {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn cut(
        &mut self,
        network: &mut Network,
        cycle: &[NodeIndex],
        truncation: &TruncationParams,
        diag: &mut dyn Diagnostics,
    ) -> Result<()> {
        let members: BTreeSet<NodeIndex> = cycle.iter().copied().collect();
        let environment = artificial_cut(network, &members).context("building loop environment")?;
        let budget = truncation.tightened(environment.correction);

        // external legs face identity pads and need no weighting
        let cutoff = budget.effective_rtol(DEFAULT_RTOL);
        let mut metrics = BTreeMap::new();
        for &(leg, facing) in &environment.partners {
            if network.partner(leg)?.is_some() {
                metrics.insert(leg, leg_metric(&environment.network, facing, cutoff)?);
            }
        }
        debug!(
            cycle_len = cycle.len(),
            correction = environment.correction,
            weighted_legs = metrics.len(),
            env_size = environment.network.total_size();
            "environment cut"
        );
        diag.on_cut(cycle.len(), environment.correction);

        let (mut ring, map) = network.copy_subset(&members)?;
        for (&leg, metric) in &metrics {
            ring.transform_bucket(leg, &metric.weight)?;
        }
        let order = cycle
            .iter()
            .map(|n| map.get(n).copied().ok_or(NetworkError::NodeNotFound(*n)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        open_ring(&mut ring, &order, &budget, diag).context("opening weighted ring")?;
        for (&leg, metric) in &metrics {
            ring.transform_bucket(leg, &metric.inverse)?;
        }

        network.adopt(cycle, ring)?;
        network.cut_links()?;
        Ok(())
    }
}

/// Turn the ring `order` of `ring` into a chain.
///
/// The running node starts as `order[0]`. Each following node is merged into
/// it, and the running node is split so that the current node's own legs and
/// the bond to the previous factor stay behind. The closing link travels with
/// the running node and is summed when the last node is merged.
fn open_ring(
    ring: &mut Network,
    order: &[NodeIndex],
    budget: &TruncationParams,
    diag: &mut dyn Diagnostics,
) -> Result<()> {
    let Some((&last, body)) = order.split_last() else {
        return Ok(());
    };
    let mut own = Vec::with_capacity(order.len());
    for &n in order {
        let mut legs = Vec::new();
        for &b in ring.node(n)?.buckets() {
            if ring.partner(b)?.is_none() {
                legs.push(b);
            }
        }
        own.push(legs);
    }

    let mut current = order[0];
    let mut bond: Option<BucketId> = None;
    for (i, &n) in body.iter().enumerate() {
        if i > 0 {
            current = ring.merge_nodes(current, n)?;
        }
        if own[i].is_empty() {
            continue;
        }
        let keep: Vec<BucketId> = bond.into_iter().chain(own[i].iter().copied()).collect();
        let outcome = ring.split_node(current, &keep, budget)?;
        diag.on_truncation(outcome.discarded);
        bond = ring.node(outcome.right)?.buckets().first().copied();
        current = outcome.right;
    }
    if current != last {
        ring.merge_nodes(current, last)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCounters;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Ring of `n` nodes `[left, phys, right]` with random entries.
    fn ring(n: usize, bond: usize, phys: usize, seed: u64) -> (Network, Vec<NodeIndex>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tensors = (0..n)
            .map(|_| ArrayTensor::random(&mut rng, vec![bond, phys, bond]))
            .collect();
        ring_of(tensors)
    }

    fn ring_of(tensors: Vec<ArrayTensor>) -> (Network, Vec<NodeIndex>) {
        let mut net = Network::new();
        let nodes: Vec<NodeIndex> = tensors.into_iter().map(|t| net.add_node(t)).collect();
        let n = nodes.len();
        for i in 0..n {
            let right = net.node(nodes[i]).unwrap().buckets()[2];
            let left = net.node(nodes[(i + 1) % n]).unwrap().buckets()[0];
            net.link(right, left).unwrap();
        }
        (net, nodes)
    }

    /// `|0...0> + eps |1...1>` as a ring of copy tensors; `eps` sits on the first node.
    fn ghz_ring(n: usize, eps: f64) -> (Network, Vec<NodeIndex>) {
        let tensors = (0..n)
            .map(|i| {
                ArrayTensor::from_fn(vec![2, 2, 2], |idx| match (idx[0], idx[1], idx[2]) {
                    (0, 0, 0) => 1.0,
                    (1, 1, 1) if i == 0 => eps,
                    (1, 1, 1) => 1.0,
                    _ => 0.0,
                })
            })
            .collect();
        ring_of(tensors)
    }

    fn relative_distance(actual: &ArrayTensor, expected: &ArrayTensor) -> f64 {
        assert_eq!(actual.dims(), expected.dims());
        let diff: f64 = actual
            .to_dense_vec()
            .iter()
            .zip(expected.to_dense_vec())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        diff.sqrt() / expected.log_norm().exp()
    }

    #[test]
    fn test_artificial_cut_of_isolated_loop_pads_identities() {
        let (net, nodes) = ring(4, 2, 2, 1);
        let members: BTreeSet<NodeIndex> = nodes.iter().copied().collect();
        let env = artificial_cut(&net, &members).unwrap();
        assert_eq!(env.correction, 1.0);
        assert_eq!(env.partners.len(), 4);
        assert_eq!(env.network.node_count(), 4);
    }

    #[test]
    fn test_artificial_cut_counts_environment_cycles() {
        let (mut net, nodes) = ring(4, 3, 2, 2);
        // attach a 2-node loop to the first ring node's external leg
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let p = net.add_node(ArrayTensor::random(&mut rng, vec![2, 5, 5]));
        let q = net.add_node(ArrayTensor::random(&mut rng, vec![5, 5]));
        let leg = net.node(nodes[0]).unwrap().buckets()[1];
        let pb = net.node(p).unwrap().buckets().to_vec();
        let qb = net.node(q).unwrap().buckets().to_vec();
        net.link(leg, pb[0]).unwrap();
        net.link(pb[1], qb[0]).unwrap();
        net.link(pb[2], qb[1]).unwrap();

        let members: BTreeSet<NodeIndex> = nodes.iter().copied().collect();
        let env = artificial_cut(&net, &members).unwrap();
        assert_eq!(env.correction, 5.0);
        assert!(env.network.is_acyclic());
        env.network.check().unwrap();
    }

    #[test]
    fn test_leg_metric_of_projector_has_rank_one() {
        let mut env = Network::new();
        let vector = ArrayTensor::from_fn(vec![3], |i| if i[0] == 0 { 2.0 } else { 0.0 });
        let v = env.add_node(vector);
        let facing = env.node(v).unwrap().buckets()[0];
        let metric = leg_metric(&env, facing, 1e-8).unwrap();
        assert_eq!(metric.weight.dims(), &[1, 3]);
        assert_eq!(metric.inverse.dims(), &[3, 1]);

        // inverse * weight projects onto the first basis vector
        let projector = metric.inverse.contract(&[1], &metric.weight, &[0]).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == 0 && j == 0 { 1.0 } else { 0.0 };
                approx::assert_relative_eq!(
                    projector.get(&[i, j]).unwrap(),
                    expected,
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_exact_cut_preserves_tensor() {
        let (mut net, nodes) = ring(4, 2, 2, 4);
        let before = net.contract_all().unwrap();

        let mut diag = DiagnosticCounters::new();
        EnvironmentCut::new()
            .cut(&mut net, &nodes, &TruncationParams::new(), &mut diag)
            .unwrap();
        assert!(net.is_acyclic());
        net.check().unwrap();
        assert_eq!(diag.cuts, 1);

        let after = net.contract_all().unwrap();
        assert!(relative_distance(&after, &before) < 1e-10);
    }

    #[test]
    fn test_projecting_environment_shrinks_loop() {
        let (mut net, nodes) = ring(4, 4, 4, 5);
        for &n in &nodes {
            let leg = net.node(n).unwrap().buckets()[1];
            let e0 = ArrayTensor::from_fn(vec![4], |i| if i[0] == 0 { 1.0 } else { 0.0 });
            let v = net.add_node(e0);
            let facing = net.node(v).unwrap().buckets()[0];
            net.link(leg, facing).unwrap();
        }
        let before = net.contract_all().unwrap();
        let loop_size: usize = nodes.iter().map(|&n| net.tensor(n).unwrap().size()).sum();

        EnvironmentCut::new()
            .cut(
                &mut net,
                &nodes,
                &TruncationParams::new().with_rtol(1e-2),
                &mut DiagnosticCounters::new(),
            )
            .unwrap();
        net.check().unwrap();
        assert!(net.is_acyclic());

        // every bond inside the loop ends with width one and is severed;
        // only the four leg links to the projectors remain
        assert_eq!(net.link_count(), 4);
        assert!(net.links().iter().all(|&e| net.link_dim(e).unwrap() == 4));
        let projectors = 4 * 4;
        assert!(net.total_size() - projectors < loop_size / 4);

        let after = net.contract_all().unwrap();
        let ratio = after.scalar().unwrap() / before.scalar().unwrap();
        approx::assert_relative_eq!(ratio, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn test_environment_cycle_tightens_budget() {
        let eps = 5e-3;
        let rtol = 1e-2;

        // isolated loop: correction 1, the eps branch falls below rtol and is dropped
        let (mut net, nodes) = ghz_ring(4, eps);
        let before = net.contract_all().unwrap();
        let mut diag = DiagnosticCounters::new();
        EnvironmentCut::new()
            .cut(&mut net, &nodes, &TruncationParams::new().with_rtol(rtol), &mut diag)
            .unwrap();
        assert_eq!(diag.cut_corrections, vec![1.0]);
        assert!(diag.aggregate_error > 0.8 * eps);
        let err = relative_distance(&net.contract_all().unwrap(), &before);
        assert!(err > 0.8 * eps && err < rtol, "relative error {err}");

        // same loop with a double link of width 5 behind the third leg:
        // correction 5 tightens rtol below eps, so the cut is exact
        let (mut net, nodes) = ghz_ring(4, eps);
        let p = net.add_node(ArrayTensor::from_fn(vec![2, 5, 5], |idx| {
            if idx[0] == idx[1] && idx[1] == idx[2] {
                1.0
            } else {
                0.0
            }
        }));
        let q = net.add_node(ArrayTensor::identity(5));
        let leg = net.node(nodes[2]).unwrap().buckets()[1];
        let pb = net.node(p).unwrap().buckets().to_vec();
        let qb = net.node(q).unwrap().buckets().to_vec();
        net.link(leg, pb[0]).unwrap();
        net.link(pb[1], qb[0]).unwrap();
        net.link(pb[2], qb[1]).unwrap();
        assert_eq!(net.cyclomatic_number(), 2);
        let before = net.contract_all().unwrap();

        let mut diag = DiagnosticCounters::new();
        EnvironmentCut::new()
            .cut(&mut net, &nodes, &TruncationParams::new().with_rtol(rtol), &mut diag)
            .unwrap();
        net.check().unwrap();
        assert_eq!(diag.cut_corrections, vec![5.0]);
        assert_eq!(net.cyclomatic_number(), 1);
        assert!(diag.aggregate_error < 1e-12);
        let err = relative_distance(&net.contract_all().unwrap(), &before);
        assert!(err < 1e-10, "relative error {err}");
    }
}
