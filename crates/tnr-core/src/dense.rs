//! Row-major dense kernels: strides, permutation and GEMM-based tensordot.
//!
//! These functions operate on raw `&[f64]` buffers plus a shape. Validation of
//! axes and dimensions is done by the callers in [`crate::ArrayTensor`].

use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, MatMut, MatRef, Par};

/// Row-major strides for the given shape.
pub(crate) fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let rank = dims.len();
    let mut strides = vec![1; rank];
    for i in (0..rank.saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Permute a row-major buffer. Output axis `i` is input axis `perm[i]`.
pub(crate) fn permute_data(data: &[f64], dims: &[usize], perm: &[usize]) -> Vec<f64> {
    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        return data.to_vec();
    }

    let rank = dims.len();
    let size = data.len();
    let old_strides = compute_strides(dims);
    let new_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
    let src_strides: Vec<usize> = perm.iter().map(|&p| old_strides[p]).collect();

    let mut out = Vec::with_capacity(size);
    let mut counter = vec![0usize; rank];
    let mut src = 0usize;
    for _ in 0..size {
        out.push(data[src]);
        // odometer increment over the output multi-index
        for ax in (0..rank).rev() {
            counter[ax] += 1;
            src += src_strides[ax];
            if counter[ax] < new_dims[ax] {
                break;
            }
            src -= src_strides[ax] * new_dims[ax];
            counter[ax] = 0;
        }
    }
    out
}

/// Compute permutation to make contracted axes contiguous.
///
/// If `axes_at_front` is true, contracted axes are moved to the front (maintaining input order).
/// If false, contracted axes are moved to the end (maintaining input order).
///
/// Returns (permutation, new_dims).
pub(crate) fn compute_contraction_permutation(
    dims: &[usize],
    axes: &[usize],
    axes_at_front: bool,
) -> (Vec<usize>, Vec<usize>) {
    let ndim = dims.len();
    let non_contracted: Vec<usize> = (0..ndim).filter(|i| !axes.contains(i)).collect();

    let perm: Vec<usize> = if axes_at_front {
        axes.iter().chain(non_contracted.iter()).cloned().collect()
    } else {
        non_contracted.iter().chain(axes.iter()).cloned().collect()
    };

    let new_dims: Vec<usize> = perm.iter().map(|&i| dims[i]).collect();
    (perm, new_dims)
}

/// Multiply two row-major matrices: `C[m, n] = A[m, k] @ B[k, n]`.
pub(crate) fn gemm(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut c = vec![0.0; m * n];
    if m == 0 || n == 0 || k == 0 {
        return c;
    }

    // Data is row-major: row_stride = number of columns, col_stride = 1.
    // SAFETY: the buffers hold exactly m*k, k*n and m*n elements.
    let a_mat = unsafe { MatRef::from_raw_parts(a.as_ptr(), m, k, k as isize, 1) };
    let b_mat = unsafe { MatRef::from_raw_parts(b.as_ptr(), k, n, n as isize, 1) };
    let mut c_mat = unsafe { MatMut::from_raw_parts_mut(c.as_mut_ptr(), m, n, n as isize, 1) };

    // C = 1.0 * A * B
    faer_matmul(&mut c_mat, Accum::Replace, a_mat, b_mat, 1.0, Par::Seq);

    c
}

/// Contract two row-major buffers whose contracted axes are already contiguous:
/// at the END of `a` and at the FRONT of `b`.
///
/// ```text
/// A[m..., k...] @ B[k..., n...] = C[m..., n...]
/// ```
pub(crate) fn contract_via_gemm(
    a: &[f64],
    dims_a: &[usize],
    b: &[f64],
    dims_b: &[usize],
    naxes: usize,
) -> Vec<f64> {
    let ndim_a = dims_a.len();

    let m: usize = dims_a.iter().take(ndim_a - naxes).product();
    let k: usize = dims_a.iter().skip(ndim_a - naxes).product();
    let n: usize = dims_b.iter().skip(naxes).product();

    gemm(a, b, m, k, n)
}
