//! Loop elimination: Simplify, Detect, Cut until the network is acyclic.

use anyhow::{Context, Result};
use log::debug;
use petgraph::stable_graph::NodeIndex;
use tnr_core::TruncationParams;

use super::simplify;
use crate::diagnostics::Diagnostics;
use crate::error::TreeTensorError;
use crate::network::Network;
use crate::options::TreeTensorOptions;

/// A lossy, accuracy-bounded procedure that removes one independent cycle.
///
/// Implementations rewrite the nodes of `cycle` (a simple cycle, consecutive
/// entries linked, last linked to first) so that the network's cyclomatic
/// number strictly decreases. Every truncation must respect `truncation`,
/// possibly tightened, and be reported through `diag`.
pub trait LoopCutter {
    fn name(&self) -> &'static str;

    fn cut(
        &mut self,
        network: &mut Network,
        cycle: &[NodeIndex],
        truncation: &TruncationParams,
        diag: &mut dyn Diagnostics,
    ) -> Result<()>;
}

/// Restore acyclicity of `network`.
///
/// Alternates lossless simplification with one Cut per remaining cycle,
/// always targeting the shortest cycle of the current basis.
///
/// # Errors
/// [`TreeTensorError::NoProgress`] if a Cut leaves the cyclomatic number unchanged.
pub(crate) fn eliminate_loops(
    network: &mut Network,
    options: &TreeTensorOptions,
    diag: &mut dyn Diagnostics,
) -> Result<()> {
    simplify(network, diag)?;
    let mut cutter = options.loop_strategy.cutter();
    loop {
        let before = network.cyclomatic_number();
        if before == 0 {
            return Ok(());
        }
        let Some(cycle) = network
            .cycle_basis()
            .into_iter()
            .min_by_key(|c| c.len())
        else {
            return Err(TreeTensorError::Cyclic(before).into());
        };
        debug!(cycles = before, cycle_len = cycle.len(), strategy = cutter.name(); "cutting loop");

        cutter
            .cut(network, &cycle, &options.truncation, diag)
            .with_context(|| format!("{} cut of a {}-cycle", cutter.name(), cycle.len()))?;
        simplify(network, diag)?;

        let after = network.cyclomatic_number();
        if after >= before {
            return Err(TreeTensorError::NoProgress { before, after }.into());
        }
    }
}
