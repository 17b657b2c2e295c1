//! `nonlinear` defines a nonlinear system of equations, `r(u; g) = 0`.
//!
//! Instead of directly defining the nonlinear system, we define the
//! linearized system via its residual and Jacobian evaluated at a given
//! state `u` with given variables `g`: `A := dr/du` and `b := -r`.
//! Whenever `u` or `g` changes, the system operator and right-hand side
//! are invalidated and recomputed on request.

#![allow(non_snake_case)]

use super::linear::{LinearSystem, TensorList};
use crate::errors::Result;
use crate::model::VariableName;

pub trait NonlinearSystem: LinearSystem {
    /// Sets the given variables g of the current step.
    fn set_g(&mut self, g: TensorList) -> Result<()>;
    /// Gets the given variables g of the current step.
    fn g(&self) -> Result<TensorList>;

    /// The ID-to-prescribed-variable mapping.
    fn gmap(&self) -> Vec<VariableName>;
    /// The ID-to-prescribed-variable intermediate-shape mapping.
    fn intmd_glayout(&self) -> Vec<Vec<usize>>;
    /// The ID-to-prescribed-variable base-shape mapping.
    fn glayout(&self) -> Vec<Vec<usize>>;

    /// Number of columns of the auxiliary operator B.
    fn p(&self) -> usize {
        self.intmd_glayout()
            .iter()
            .zip(self.glayout())
            .map(|(i, b)| crate::tensor::shape::numel(i) * crate::tensor::shape::numel(&b))
            .sum()
    }

    /// Assembles the auxiliary matrix B = dr/dg along with A and b.
    fn A_and_B_and_b(&mut self) -> Result<(TensorList, TensorList, TensorList)>;

    /// Sets the old-step state.
    fn set_un(&mut self, un: TensorList) -> Result<()>;
    /// Gets the old-step state.
    fn un(&self) -> Result<TensorList>;
    /// Sets the old-step given variables.
    fn set_gn(&mut self, gn: TensorList) -> Result<()>;
    /// Gets the old-step given variables.
    fn gn(&self) -> Result<TensorList>;
}
