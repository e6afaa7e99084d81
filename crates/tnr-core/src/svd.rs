//! Thin SVD of row-major matrices and truncation-rank selection.

use faer::Mat;

use crate::error::{CoreError, Result};
use crate::truncation::{TruncationParams, DEFAULT_RTOL};

/// Thin SVD of an `m × n` matrix: `A = U * diag(S) * V^T`.
///
/// All buffers are row-major with `k = min(m, n)`:
/// - `u`: m×k
/// - `s`: k singular values in descending order
/// - `v`: n×k (V, not V^T)
#[derive(Debug, Clone)]
pub struct MatrixSvd {
    pub m: usize,
    pub n: usize,
    pub u: Vec<f64>,
    pub s: Vec<f64>,
    pub v: Vec<f64>,
}

impl MatrixSvd {
    /// Number of singular values (`min(m, n)`).
    pub fn full_rank(&self) -> usize {
        self.s.len()
    }
}

/// Compute the thin SVD of a row-major `m × n` matrix using faer.
pub fn svd_row_major(data: &[f64], m: usize, n: usize) -> Result<MatrixSvd> {
    if data.len() != m * n {
        return Err(CoreError::ShapeMismatch {
            dims: vec![m, n],
            len: data.len(),
            expected: m * n,
        });
    }
    let k = m.min(n);
    if k == 0 {
        return Ok(MatrixSvd {
            m,
            n,
            u: Vec::new(),
            s: Vec::new(),
            v: Vec::new(),
        });
    }

    let a = Mat::<f64>::from_fn(m, n, |i, j| data[i * n + j]);
    let decomp = a
        .thin_svd()
        .map_err(|e| CoreError::Svd(format!("{e:?}")))?;

    let u_mat = decomp.U();
    let v_mat = decomp.V();
    let s_col = decomp.S().column_vector();

    let mut s = Vec::with_capacity(k);
    for i in 0..k {
        s.push(s_col[i]);
    }

    let mut u = Vec::with_capacity(m * k);
    for i in 0..m {
        for j in 0..k {
            u.push(u_mat[(i, j)]);
        }
    }

    let mut v = Vec::with_capacity(n * k);
    for i in 0..n {
        for j in 0..k {
            v.push(v_mat[(i, j)]);
        }
    }

    Ok(MatrixSvd { m, n, u, s, v })
}

/// Select how many singular values to keep.
///
/// Returns `(k, discarded)` where `k >= 1` (when any singular value exists) and
/// `discarded` is the relative Frobenius weight of the dropped tail.
pub fn truncation_rank(singular_values: &[f64], params: &TruncationParams) -> (usize, f64) {
    let full = singular_values.len();
    if full == 0 {
        return (0, 0.0);
    }

    let rtol = params.effective_rtol(DEFAULT_RTOL).max(0.0);
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    if total <= 0.0 || !total.is_finite() {
        return (1, 0.0);
    }

    // tail[k] = sum of squares of singular values with index >= k
    let mut tail = vec![0.0; full + 1];
    for i in (0..full).rev() {
        tail[i] = tail[i + 1] + singular_values[i] * singular_values[i];
    }

    let budget = rtol * rtol * total;
    let mut k = full;
    while k > 1 && tail[k - 1] <= budget {
        k -= 1;
    }
    // exact zeros are always dropped
    while k > 1 && singular_values[k - 1] == 0.0 {
        k -= 1;
    }

    let k = k.min(params.effective_max_rank()).max(1);
    let discarded = (tail[k] / total).sqrt();
    (k, discarded)
}

/// Von Neumann entropy of the normalized squared singular values.
pub fn entanglement_entropy(singular_values: &[f64]) -> f64 {
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    if total <= 0.0 {
        return 0.0;
    }
    singular_values
        .iter()
        .map(|s| s * s / total)
        .filter(|&p| p > 0.0)
        .map(|p| -p * p.ln())
        .sum()
}
