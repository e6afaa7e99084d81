//! Common tensor capability shared by dense and tree-backed tensors.
//!
//! [`AnyTensor`] is the closed set of tensor representations a caller (for
//! example a contraction scheduler) can hold. Mixed operations promote the
//! dense operand explicitly with [`TreeTensor::from_array`], using the tree
//! operand's options.

use anyhow::Result;
use tnr_core::ArrayTensor;

use crate::error::TreeTensorError;
use crate::options::TreeTensorOptions;
use crate::treetensor::TreeTensor;

/// Operations every tensor representation supports.
pub trait TensorLike: Sized {
    /// Widths of the external indices.
    fn shape(&self) -> Vec<usize>;

    fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Number of stored elements.
    fn size(&self) -> usize;

    /// Contract indices `ind` of `self` with `other_ind` of `other`.
    fn contract(&self, ind: &[usize], other: &Self, other_ind: &[usize]) -> Result<Self>;

    /// Trace each index of `ind0` against the matching index of `ind1`.
    fn trace(&self, ind0: &[usize], ind1: &[usize]) -> Result<Self>;

    /// Dense materialization in external index order.
    fn to_array(&self) -> Result<ArrayTensor>;
}

/// Dense leaf or tree-backed composite.
#[derive(Debug, Clone)]
pub enum AnyTensor {
    Array(ArrayTensor),
    Tree(TreeTensor),
}

impl From<ArrayTensor> for AnyTensor {
    fn from(t: ArrayTensor) -> Self {
        AnyTensor::Array(t)
    }
}

impl From<TreeTensor> for AnyTensor {
    fn from(t: TreeTensor) -> Self {
        AnyTensor::Tree(t)
    }
}

impl AnyTensor {
    /// Convert to a tree, promoting a dense tensor with `options`.
    pub fn into_tree(self, options: TreeTensorOptions) -> TreeTensor {
        match self {
            AnyTensor::Array(t) => TreeTensor::from_array(t, options),
            AnyTensor::Tree(t) => t,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, AnyTensor::Tree(_))
    }
}

impl TensorLike for AnyTensor {
    fn shape(&self) -> Vec<usize> {
        match self {
            AnyTensor::Array(t) => t.dims().to_vec(),
            AnyTensor::Tree(t) => t.shape(),
        }
    }

    fn size(&self) -> usize {
        match self {
            AnyTensor::Array(t) => t.size(),
            AnyTensor::Tree(t) => t.size(),
        }
    }

    fn contract(&self, ind: &[usize], other: &Self, other_ind: &[usize]) -> Result<Self> {
        match (self, other) {
            (AnyTensor::Array(a), AnyTensor::Array(b)) => {
                Ok(AnyTensor::Array(a.contract(ind, b, other_ind)?))
            }
            (AnyTensor::Tree(a), AnyTensor::Tree(b)) => {
                Ok(AnyTensor::Tree(a.contract(ind, b, other_ind)?))
            }
            (AnyTensor::Tree(a), AnyTensor::Array(b)) => {
                let b = TreeTensor::from_array(b.clone(), *a.options());
                Ok(AnyTensor::Tree(a.contract(ind, &b, other_ind)?))
            }
            (AnyTensor::Array(a), AnyTensor::Tree(b)) => {
                let a = TreeTensor::from_array(a.clone(), *b.options());
                Ok(AnyTensor::Tree(a.contract(ind, b, other_ind)?))
            }
        }
    }

    fn trace(&self, ind0: &[usize], ind1: &[usize]) -> Result<Self> {
        match self {
            AnyTensor::Array(t) => Ok(AnyTensor::Array(trace_dense(t, ind0, ind1)?)),
            AnyTensor::Tree(t) => Ok(AnyTensor::Tree(t.trace(ind0, ind1)?)),
        }
    }

    fn to_array(&self) -> Result<ArrayTensor> {
        match self {
            AnyTensor::Array(t) => Ok(t.clone()),
            AnyTensor::Tree(t) => t.array(),
        }
    }
}

impl TensorLike for TreeTensor {
    fn shape(&self) -> Vec<usize> {
        TreeTensor::shape(self)
    }

    fn size(&self) -> usize {
        TreeTensor::size(self)
    }

    fn contract(&self, ind: &[usize], other: &Self, other_ind: &[usize]) -> Result<Self> {
        TreeTensor::contract(self, ind, other, other_ind)
    }

    fn trace(&self, ind0: &[usize], ind1: &[usize]) -> Result<Self> {
        TreeTensor::trace(self, ind0, ind1)
    }

    fn to_array(&self) -> Result<ArrayTensor> {
        self.array()
    }
}

/// Trace several index pairs of a dense tensor, positions given before removal.
fn trace_dense(t: &ArrayTensor, ind0: &[usize], ind1: &[usize]) -> Result<ArrayTensor> {
    if ind0.len() != ind1.len() {
        return Err(TreeTensorError::IndexCountMismatch(ind0.len(), ind1.len()).into());
    }
    // remaining[k] is the original position of the current axis k
    let mut remaining: Vec<usize> = (0..t.rank()).collect();
    let mut result = t.clone();
    for (&i, &j) in ind0.iter().zip(ind1) {
        let pi = remaining
            .iter()
            .position(|&p| p == i)
            .ok_or(TreeTensorError::IndexReused(i))?;
        let pj = remaining
            .iter()
            .position(|&p| p == j)
            .ok_or(TreeTensorError::IndexReused(j))?;
        result = result.trace(pi, pj)?;
        remaining.retain(|&p| p != i && p != j);
    }
    Ok(result)
}
