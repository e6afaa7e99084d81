//! Minimum-entropy bipartition search.
//!
//! Given a tensor, find the split of its indices into two groups whose
//! matricization has the smallest entanglement entropy. Low entropy means the
//! singular spectrum decays fast, so an accuracy-bounded split along that
//! bipartition keeps a small bond dimension.

use log::debug;

use crate::array_tensor::ArrayTensor;
use crate::error::{CoreError, Result};

/// Relative slack within which a preferred bipartition beats the minimum.
const PREFERENCE_TOLERANCE: f64 = 1e-10;

/// Minimum-entropy bipartition of `tensor`'s indices.
///
/// Candidates are all subsets containing axis 0 whose size leaves at least two
/// indices on each side (one, for tensors of rank below four). The returned
/// axis list is sorted and always contains axis 0.
///
/// If `preferred` is given, it is returned whenever its entropy is within
/// [`PREFERENCE_TOLERANCE`] of the minimum. The preferred set may name either
/// side of the bipartition.
///
/// # Errors
/// Returns [`CoreError::NoBipartition`] for tensors of rank below two.
pub fn min_entropy_bipartition(
    tensor: &ArrayTensor,
    preferred: Option<&[usize]>,
) -> Result<Vec<usize>> {
    let rank = tensor.rank();
    if rank < 2 {
        return Err(CoreError::NoBipartition(rank));
    }
    let min_side = if rank >= 4 { 2 } else { 1 };

    let mut best: Option<(f64, Vec<usize>)> = None;
    // bit b of `mask` selects axis b + 1; axis 0 is always on the left
    for mask in 0u64..(1u64 << (rank - 1)) {
        let mut left = vec![0usize];
        left.extend((1..rank).filter(|a| mask & (1 << (a - 1)) != 0));
        if left.len() < min_side || rank - left.len() < min_side {
            continue;
        }
        let entropy = tensor.bipartition_entropy(&left)?;
        let better = match &best {
            None => true,
            Some((e, _)) => entropy < *e,
        };
        if better {
            best = Some((entropy, left));
        }
    }

    let (min_entropy, min_left) = best.ok_or(CoreError::NoBipartition(rank))?;

    if let Some(pref) = preferred {
        let pref = canonical_side(pref, rank);
        let pref_entropy = tensor.bipartition_entropy(&pref)?;
        if pref_entropy <= min_entropy + PREFERENCE_TOLERANCE * (1.0 + min_entropy.abs()) {
            debug!(rank, entropy = pref_entropy; "keeping preferred bipartition");
            return Ok(pref);
        }
    }

    debug!(rank, entropy = min_entropy; "minimum-entropy bipartition found");
    Ok(min_left)
}

/// Express a bipartition by the side that contains axis 0, sorted.
pub fn canonical_side(side: &[usize], rank: usize) -> Vec<usize> {
    let mut side: Vec<usize> = if side.contains(&0) {
        side.to_vec()
    } else {
        (0..rank).filter(|a| !side.contains(a)).collect()
    };
    side.sort_unstable();
    side
}
