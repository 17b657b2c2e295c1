//! `linear` defines a linear system of equations, `A u = b`.
//!
//! Values are exchanged as lists of tensors keyed by position in the
//! respective variable maps; missing entries are zero. Assembled
//! operators are exchanged the same way, in row-major block order.

#![allow(non_snake_case)]

use crate::errors::{MateriaError, Result};
use crate::model::VariableName;
use crate::tensor::shape::numel;
use crate::tensor::Tensor;

/// A positional list of per-variable tensors; `None` entries are zero.
pub type TensorList = Vec<Option<Tensor>>;

/// Definition of a linear system of equations, `A u = b`, with the
/// unknowns partitioned into one or more variable groups.
pub trait LinearSystem {
    /// Number of unknown variable groups.
    fn n_ugroup(&self) -> usize;
    /// Number of right-hand-side variable groups.
    fn n_bgroup(&self) -> usize;

    /// The ID-to-unknown mapping of one group.
    fn umap(&self, group: usize) -> Vec<VariableName>;
    /// The ID-to-unknown intermediate-shape mapping of one group.
    fn intmd_ulayout(&self, group: usize) -> Vec<Vec<usize>>;
    /// The ID-to-unknown base-shape mapping of one group.
    fn ulayout(&self, group: usize) -> Vec<Vec<usize>>;

    /// The ID-to-RHS mapping of one group.
    fn bmap(&self, group: usize) -> Vec<VariableName>;
    /// The ID-to-RHS intermediate-shape mapping of one group.
    fn intmd_blayout(&self, group: usize) -> Vec<Vec<usize>>;
    /// The ID-to-RHS base-shape mapping of one group.
    fn blayout(&self, group: usize) -> Vec<Vec<usize>>;

    /// Number of rows of the assembled operator.
    fn m(&self) -> usize {
        (0..self.n_bgroup())
            .map(|g| {
                self.intmd_blayout(g)
                    .iter()
                    .zip(self.blayout(g))
                    .map(|(i, b)| numel(i) * numel(&b))
                    .sum::<usize>()
            })
            .sum()
    }

    /// Number of columns of the assembled operator.
    fn n(&self) -> usize {
        (0..self.n_ugroup())
            .map(|g| {
                self.intmd_ulayout(g)
                    .iter()
                    .zip(self.ulayout(g))
                    .map(|(i, b)| numel(i) * numel(&b))
                    .sum::<usize>()
            })
            .sum()
    }

    /// Sets the unknown u.
    fn set_u(&mut self, u: TensorList) -> Result<()>;
    /// Gets the unknown u.
    fn u(&self) -> Result<TensorList>;

    /// Assembles and returns the operator, A.
    fn A(&mut self) -> Result<TensorList>;
    /// Assembles and returns the right-hand side, b.
    fn b(&mut self) -> Result<TensorList>;
    /// Assembles and returns the operator and right-hand side.
    fn A_and_b(&mut self) -> Result<(TensorList, TensorList)>;

    /// Assembles the auxiliary matrix B = dr/dg along with A. A plain
    /// linear system has no prescribed variables; subclasses that do
    /// must override.
    fn A_and_B(&mut self) -> Result<(TensorList, TensorList)> {
        Err(MateriaError::unsupported(
            "this linear system does not define the auxiliary operator B",
        ))
    }
}
