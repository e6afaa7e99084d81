//! Dense tensors with a separately tracked logarithmic scale.
//!
//! The semantic value of an [`ArrayTensor`] is `data × exp(log_scale)`. Every
//! operation that produces a new tensor renormalizes `data` so that its largest
//! absolute entry is one and moves the magnitude into `log_scale`. Products of
//! thousands of Boltzmann weights therefore never overflow the stored array.

use std::fmt;

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::dense::{compute_contraction_permutation, contract_via_gemm, permute_data};
use crate::error::{CoreError, Result};
use crate::svd::{entanglement_entropy, svd_row_major, truncation_rank};
use crate::truncation::TruncationParams;

/// Dense row-major `f64` tensor with a logarithmic scale factor.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayTensor {
    dims: Vec<usize>,
    data: Vec<f64>,
    log_scale: f64,
}

/// Result of [`ArrayTensor::svd_split`].
#[derive(Debug, Clone)]
pub struct SvdSplit {
    /// Indices: `left_axes ++ [bond]`.
    pub left: ArrayTensor,
    /// Indices: `[bond] ++ remaining axes` (original relative order).
    pub right: ArrayTensor,
    /// Singular values that were kept, in descending order.
    pub singular_values: Vec<f64>,
    /// Relative Frobenius weight of the discarded singular values.
    pub discarded: f64,
}

impl SvdSplit {
    /// Width of the new shared index.
    pub fn bond_dim(&self) -> usize {
        self.singular_values.len()
    }
}

impl ArrayTensor {
    /// Create a tensor from row-major data.
    ///
    /// # Errors
    /// Returns [`CoreError::ShapeMismatch`] if `data.len()` differs from the
    /// product of `dims`.
    pub fn new(dims: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(CoreError::ShapeMismatch {
                dims,
                len: data.len(),
                expected,
            });
        }
        let mut t = Self {
            dims,
            data,
            log_scale: 0.0,
        };
        t.normalize();
        Ok(t)
    }

    /// Create a tensor from already-normalized parts.
    ///
    /// The stored array is renormalized, so any `data` is accepted.
    pub fn with_log_scale(dims: Vec<usize>, data: Vec<f64>, log_scale: f64) -> Result<Self> {
        let mut t = Self::new(dims, data)?;
        t.log_scale += log_scale;
        Ok(t)
    }

    /// Rank-0 tensor holding `value`.
    pub fn from_scalar(value: f64) -> Self {
        let mut t = Self {
            dims: Vec::new(),
            data: vec![value],
            log_scale: 0.0,
        };
        t.normalize();
        t
    }

    /// All-zero tensor of the given shape.
    pub fn zeros(dims: Vec<usize>) -> Self {
        let size = dims.iter().product();
        Self {
            dims,
            data: vec![0.0; size],
            log_scale: 0.0,
        }
    }

    /// `n × n` identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Self {
            dims: vec![n, n],
            data,
            log_scale: 0.0,
        }
    }

    /// Build a tensor by evaluating `f` at every multi-index (row-major order).
    pub fn from_fn(dims: Vec<usize>, mut f: impl FnMut(&[usize]) -> f64) -> Self {
        let size: usize = dims.iter().product();
        let rank = dims.len();
        let mut data = Vec::with_capacity(size);
        let mut idx = vec![0usize; rank];
        for _ in 0..size {
            data.push(f(&idx));
            for ax in (0..rank).rev() {
                idx[ax] += 1;
                if idx[ax] < dims[ax] {
                    break;
                }
                idx[ax] = 0;
            }
        }
        let mut t = Self {
            dims,
            data,
            log_scale: 0.0,
        };
        t.normalize();
        t
    }

    /// Tensor with standard-normal entries.
    pub fn random<R: Rng>(rng: &mut R, dims: Vec<usize>) -> Self {
        let size: usize = dims.iter().product();
        let data: Vec<f64> = (0..size).map(|_| StandardNormal.sample(rng)).collect();
        let mut t = Self {
            dims,
            data,
            log_scale: 0.0,
        };
        t.normalize();
        t
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of stored elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn log_scale(&self) -> f64 {
        self.log_scale
    }

    /// Stored (normalized) entries, without the scale factor.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Entries with the scale factor applied.
    ///
    /// May overflow to infinity for very large scales; use [`Self::log_scale`]
    /// together with [`Self::data`] when magnitudes are extreme.
    pub fn to_dense_vec(&self) -> Vec<f64> {
        let factor = self.log_scale.exp();
        self.data.iter().map(|x| x * factor).collect()
    }

    /// Natural logarithm of the absolute value of a rank-0 tensor.
    pub fn scalar_log(&self) -> Result<f64> {
        if self.rank() != 0 {
            return Err(CoreError::NotScalar(self.rank()));
        }
        Ok(self.data[0].abs().ln() + self.log_scale)
    }

    /// Value of a rank-0 tensor.
    pub fn scalar(&self) -> Result<f64> {
        if self.rank() != 0 {
            return Err(CoreError::NotScalar(self.rank()));
        }
        Ok(self.data[0] * self.log_scale.exp())
    }

    /// Natural logarithm of the Frobenius norm.
    pub fn log_norm(&self) -> f64 {
        let norm: f64 = self.data.iter().map(|x| x * x).sum::<f64>().sqrt();
        norm.ln() + self.log_scale
    }

    /// Scaled entry at a multi-index.
    pub fn get(&self, idx: &[usize]) -> Option<f64> {
        if idx.len() != self.rank() || idx.iter().zip(&self.dims).any(|(i, d)| i >= d) {
            return None;
        }
        let pos = idx
            .iter()
            .zip(&self.dims)
            .fold(0usize, |acc, (&i, &d)| acc * d + i);
        Some(self.data[pos] * self.log_scale.exp())
    }

    // ------------------------------------------------------------------------
    // Scale handling
    // ------------------------------------------------------------------------

    /// Move the largest absolute entry into `log_scale`.
    ///
    /// All-zero (or non-finite) arrays are left untouched.
    pub fn normalize(&mut self) {
        let max = self.data.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        if max > 0.0 && max.is_finite() && max != 1.0 {
            for x in &mut self.data {
                *x /= max;
            }
            self.log_scale += max.ln();
        }
    }

    // ------------------------------------------------------------------------
    // Structural operations
    // ------------------------------------------------------------------------

    /// Reorder indices. Output axis `i` is input axis `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        if !is_permutation(perm, self.rank()) {
            return Err(CoreError::InvalidPermutation {
                perm: perm.to_vec(),
                rank: self.rank(),
            });
        }
        let data = permute_data(&self.data, &self.dims, perm);
        let dims = perm.iter().map(|&p| self.dims[p]).collect();
        Ok(Self {
            dims,
            data,
            log_scale: self.log_scale,
        })
    }

    /// Matrix transpose of a rank-2 tensor, or full index reversal otherwise.
    pub fn transpose(&self) -> Self {
        let perm: Vec<usize> = (0..self.rank()).rev().collect();
        Self {
            dims: perm.iter().map(|&p| self.dims[p]).collect(),
            data: permute_data(&self.data, &self.dims, &perm),
            log_scale: self.log_scale,
        }
    }

    /// Reinterpret the data with a new shape of equal element count.
    pub fn reshape(&self, dims: Vec<usize>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if expected != self.size() {
            return Err(CoreError::ShapeMismatch {
                dims,
                len: self.size(),
                expected,
            });
        }
        Ok(Self {
            dims,
            data: self.data.clone(),
            log_scale: self.log_scale,
        })
    }

    /// Sum over the diagonal of indices `i` and `j`, reducing the rank by two.
    pub fn trace(&self, i: usize, j: usize) -> Result<Self> {
        let rank = self.rank();
        if i >= rank || i == j {
            return Err(CoreError::InvalidAxis { axis: i, rank });
        }
        if j >= rank {
            return Err(CoreError::InvalidAxis { axis: j, rank });
        }
        if self.dims[i] != self.dims[j] {
            return Err(CoreError::DimensionMismatch(self.dims[i], self.dims[j]));
        }

        let d = self.dims[i];
        let (perm, new_dims) = compute_contraction_permutation(&self.dims, &[i, j], false);
        let permuted = permute_data(&self.data, &self.dims, &perm);
        let rest_dims: Vec<usize> = new_dims[..rank - 2].to_vec();
        let rest: usize = rest_dims.iter().product();

        let mut data = Vec::with_capacity(rest);
        for r in 0..rest {
            let base = r * d * d;
            data.push((0..d).map(|a| permuted[base + a * d + a]).sum());
        }

        let mut t = Self {
            dims: rest_dims,
            data,
            log_scale: self.log_scale,
        };
        t.normalize();
        Ok(t)
    }

    /// Tensordot: sum over `self[axes[k]]` paired with `other[other_axes[k]]`.
    ///
    /// The result's indices are the remaining indices of `self` (in order)
    /// followed by the remaining indices of `other` (in order).
    pub fn contract(&self, axes: &[usize], other: &Self, other_axes: &[usize]) -> Result<Self> {
        if axes.len() != other_axes.len() {
            return Err(CoreError::AxisCountMismatch(axes.len(), other_axes.len()));
        }
        validate_axes(axes, self.rank())?;
        validate_axes(other_axes, other.rank())?;
        for (&a, &b) in axes.iter().zip(other_axes) {
            if self.dims[a] != other.dims[b] {
                return Err(CoreError::DimensionMismatch(self.dims[a], other.dims[b]));
            }
        }

        let (perm_self, dims_self) = compute_contraction_permutation(&self.dims, axes, false);
        let (perm_other, dims_other) =
            compute_contraction_permutation(&other.dims, other_axes, true);
        let a = permute_data(&self.data, &self.dims, &perm_self);
        let b = permute_data(&other.data, &other.dims, &perm_other);

        let naxes = axes.len();
        let data = contract_via_gemm(&a, &dims_self, &b, &dims_other, naxes);

        let dims: Vec<usize> = dims_self[..dims_self.len() - naxes]
            .iter()
            .chain(dims_other[naxes..].iter())
            .copied()
            .collect();

        let mut t = Self {
            dims,
            data,
            log_scale: self.log_scale + other.log_scale,
        };
        t.normalize();
        Ok(t)
    }

    /// Outer product.
    pub fn outer(&self, other: &Self) -> Self {
        let dims = self.dims.iter().chain(other.dims.iter()).copied().collect();
        let m = self.size();
        let n = other.size();
        let mut data = Vec::with_capacity(m * n);
        for x in &self.data {
            for y in &other.data {
                data.push(x * y);
            }
        }
        let mut t = Self {
            dims,
            data,
            log_scale: self.log_scale + other.log_scale,
        };
        t.normalize();
        t
    }

    // ------------------------------------------------------------------------
    // Factorization
    // ------------------------------------------------------------------------

    /// Split into two factors along the bipartition `left_axes | rest`.
    ///
    /// Singular values are truncated according to `params`; the kept bond
    /// dimension is always at least one. Singular values are absorbed into the
    /// right factor, which also carries the original scale.
    pub fn svd_split(&self, left_axes: &[usize], params: &TruncationParams) -> Result<SvdSplit> {
        validate_axes(left_axes, self.rank())?;
        let right_axes: Vec<usize> = (0..self.rank())
            .filter(|a| !left_axes.contains(a))
            .collect();

        let perm: Vec<usize> = left_axes.iter().chain(right_axes.iter()).copied().collect();
        let matrix = permute_data(&self.data, &self.dims, &perm);
        let left_dims: Vec<usize> = left_axes.iter().map(|&a| self.dims[a]).collect();
        let right_dims: Vec<usize> = right_axes.iter().map(|&a| self.dims[a]).collect();
        let m: usize = left_dims.iter().product();
        let n: usize = right_dims.iter().product();

        let svd = svd_row_major(&matrix, m, n)?;
        let full = svd.full_rank();
        let (k, discarded) = truncation_rank(&svd.s, params);

        // U[:, :k] -> left_dims ++ [k]
        let mut left_data = Vec::with_capacity(m * k);
        for i in 0..m {
            for a in 0..k {
                left_data.push(svd.u[i * full + a]);
            }
        }
        // diag(S[:k]) V[:, :k]^T -> [k] ++ right_dims
        let mut right_data = Vec::with_capacity(k * n);
        for a in 0..k {
            for j in 0..n {
                right_data.push(svd.s[a] * svd.v[j * full + a]);
            }
        }

        let mut left_shape = left_dims;
        left_shape.push(k);
        let mut right_shape = vec![k];
        right_shape.extend(right_dims);

        let mut left = Self {
            dims: left_shape,
            data: left_data,
            log_scale: 0.0,
        };
        let mut right = Self {
            dims: right_shape,
            data: right_data,
            log_scale: self.log_scale,
        };
        left.normalize();
        right.normalize();

        Ok(SvdSplit {
            left,
            right,
            singular_values: svd.s[..k].to_vec(),
            discarded,
        })
    }

    /// Singular values of the matrix formed by `left_axes | rest`.
    pub fn singular_values(&self, left_axes: &[usize]) -> Result<Vec<f64>> {
        validate_axes(left_axes, self.rank())?;
        let right_axes: Vec<usize> = (0..self.rank())
            .filter(|a| !left_axes.contains(a))
            .collect();
        let perm: Vec<usize> = left_axes.iter().chain(right_axes.iter()).copied().collect();
        let matrix = permute_data(&self.data, &self.dims, &perm);
        let m: usize = left_axes.iter().map(|&a| self.dims[a]).product();
        let n: usize = right_axes.iter().map(|&a| self.dims[a]).product();
        Ok(svd_row_major(&matrix, m, n)?.s)
    }

    /// Entanglement entropy of the bipartition `left_axes | rest`.
    pub fn bipartition_entropy(&self, left_axes: &[usize]) -> Result<f64> {
        Ok(entanglement_entropy(&self.singular_values(left_axes)?))
    }
}

impl fmt::Display for ArrayTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArrayTensor(shape={:?}, log_scale={:.6})",
            self.dims, self.log_scale
        )
    }
}

fn is_permutation(perm: &[usize], rank: usize) -> bool {
    if perm.len() != rank {
        return false;
    }
    let mut seen = vec![false; rank];
    for &p in perm {
        if p >= rank || seen[p] {
            return false;
        }
        seen[p] = true;
    }
    true
}

fn validate_axes(axes: &[usize], rank: usize) -> Result<()> {
    let mut seen = vec![false; rank];
    for &a in axes {
        if a >= rank || seen[a] {
            return Err(CoreError::InvalidAxis { axis: a, rank });
        }
        seen[a] = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_moves_magnitude_into_scale() {
        let t = ArrayTensor::new(vec![2], vec![1e300, 2e300]).unwrap();
        assert_eq!(t.data(), &[0.5, 1.0]);
        assert_relative_eq!(t.log_scale(), (2e300f64).ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_new_rejects_bad_length() {
        let err = ArrayTensor::new(vec![2, 2], vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { expected: 4, .. }));
    }

    #[test]
    fn test_zero_tensor_stays_zero() {
        let mut t = ArrayTensor::zeros(vec![3]);
        t.normalize();
        assert_eq!(t.log_scale(), 0.0);
        assert_eq!(t.data(), &[0.0; 3]);
    }

    #[test]
    fn test_get_applies_scale() {
        let t = ArrayTensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_relative_eq!(t.get(&[1, 0]).unwrap(), 3.0, epsilon = 1e-12);
        assert!(t.get(&[2, 0]).is_none());
    }

    #[test]
    fn test_permute_rejects_invalid() {
        let t = ArrayTensor::zeros(vec![2, 3]);
        assert!(t.permute(&[0, 0]).is_err());
        assert!(t.permute(&[1]).is_err());
        assert_eq!(t.permute(&[1, 0]).unwrap().dims(), &[3, 2]);
    }

    #[test]
    fn test_reshape() {
        let t = ArrayTensor::zeros(vec![2, 3]);
        assert_eq!(t.reshape(vec![6]).unwrap().dims(), &[6]);
        assert!(t.reshape(vec![4]).is_err());
    }

    #[test]
    fn test_trace_identity() {
        let t = ArrayTensor::identity(5);
        let tr = t.trace(0, 1).unwrap();
        assert_eq!(tr.rank(), 0);
        assert_relative_eq!(tr.scalar().unwrap(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_trace_dimension_mismatch() {
        let t = ArrayTensor::zeros(vec![2, 3]);
        assert!(matches!(
            t.trace(0, 1),
            Err(CoreError::DimensionMismatch(2, 3))
        ));
    }
}
