//! Lossless structural simplification.

use anyhow::Result;
use log::debug;
use petgraph::stable_graph::NodeIndex;

use crate::diagnostics::Diagnostics;
use crate::network::Network;

/// Merge rank <= 2 nodes into a neighbour and fuse parallel links until neither applies.
///
/// Rank-0 nodes are folded into another node first. Neither rewrite raises any
/// node's rank or discards information. Returns the number of merges.
pub(crate) fn simplify(network: &mut Network, diag: &mut dyn Diagnostics) -> Result<usize> {
    network.fold_scalar_nodes()?;
    let mut merges = 0;
    while let Some((a, b)) = next_merge(network)? {
        network.merge_nodes(a, b)?;
        merges += 1;
    }
    if merges > 0 {
        debug!(merges, nodes = network.node_count(); "simplified network");
        diag.on_simplify(merges);
    }
    Ok(merges)
}

fn next_merge(network: &Network) -> Result<Option<(NodeIndex, NodeIndex)>> {
    for n in network.node_indices() {
        let neighbours = network.internal_connected(n)?;
        if network.node(n)?.rank() <= 2 {
            if let Some(&m) = neighbours.iter().next() {
                return Ok(Some((n, m)));
            }
        }
        if let Some(&m) = neighbours
            .iter()
            .find(|&&m| network.links_between(n, m).len() > 1)
        {
            return Ok(Some((n, m)));
        }
    }
    Ok(None)
}
