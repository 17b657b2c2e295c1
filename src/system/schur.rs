//! `schur` solves a two-group partitioned linear system by the Schur
//! complement method.
//!
//! The system is partitioned as `[[A11, A12], [A21, A22]]` with
//! unknowns `[u1, u2]`. The Schur complement
//! `S = A22 - A21 A11^-1 A12` is formed, `u2` is solved from
//! `S u2 = b2 - A21 A11^-1 b1`, and `u1` is back-solved from
//! `A11 u1 = b1 - A12 u2`.

#![allow(non_snake_case)]

use super::linear::{LinearSystem, TensorList};
use super::nonlinear::NonlinearSystem;
use crate::errors::{MateriaError, Result};
use crate::tensor::assembly::{assemble_matrix, assemble_vector, disassemble_vector};
use crate::tensor::shape::numel;
use crate::tensor::{base_cat, mm, mv, solve, Tensor};

pub struct SchurComplement {
    primary_group: usize,
    schur_group: usize,
}

fn flatten_grouped<T, F>(num_groups: usize, getter: F) -> Vec<T>
where
    F: Fn(usize) -> Vec<T>,
{
    let mut flattened = Vec::new();
    for i in 0..num_groups {
        flattened.extend(getter(i));
    }
    flattened
}

fn group_size(intmd: &[Vec<usize>], base: &[Vec<usize>]) -> usize {
    intmd
        .iter()
        .zip(base)
        .map(|(i, b)| numel(i) * numel(b))
        .sum()
}

impl SchurComplement {
    pub fn new(primary_group: usize, schur_group: usize) -> Result<Self> {
        if primary_group == schur_group {
            return Err(MateriaError::unsupported(
                "primary_group and schur_group must be different",
            ));
        }
        Ok(SchurComplement {
            primary_group,
            schur_group,
        })
    }

    fn check_groups(&self, n_ugroup: usize, n_bgroup: usize) -> Result<()> {
        if n_ugroup != 2 || n_bgroup != 2 {
            return Err(MateriaError::unsupported(format!(
                "the Schur complement solver requires exactly 2 variable groups; found {} \
                 unknown groups and {} residual groups",
                n_ugroup, n_bgroup
            )));
        }
        if self.primary_group >= n_ugroup || self.schur_group >= n_ugroup {
            return Err(MateriaError::unsupported(format!(
                "primary_group and schur_group must be valid group indices in [0, {}]",
                n_ugroup - 1
            )));
        }
        Ok(())
    }

    fn extract_block(
        A: &Tensor,
        row_start: usize,
        row_size: usize,
        col_start: usize,
        col_size: usize,
    ) -> Result<Tensor> {
        A.base_narrow(0, row_start, row_size)?
            .base_narrow(1, col_start, col_size)
    }

    fn spans(&self, size0: usize, size1: usize) -> (usize, usize, usize, usize) {
        // (primary_start, primary_size, schur_start, schur_size): the
        // unknown ordering always follows the group order.
        if self.primary_group == 0 {
            (0, size0, size0, size1)
        } else {
            (size0, size1, 0, size0)
        }
    }

    /// Solves the partitioned system `A u = b`.
    pub fn solve(&self, sys: &mut dyn LinearSystem) -> Result<TensorList> {
        self.check_groups(sys.n_ugroup(), sys.n_bgroup())?;

        // Assemble first: evaluation caches the intermediate shapes the
        // layouts report.
        let (A, b) = sys.A_and_b()?;

        let bilayout = flatten_grouped(sys.n_bgroup(), |i| sys.intmd_blayout(i));
        let uilayout = flatten_grouped(sys.n_ugroup(), |i| sys.intmd_ulayout(i));
        let blayout = flatten_grouped(sys.n_bgroup(), |i| sys.blayout(i));
        let ulayout = flatten_grouped(sys.n_ugroup(), |i| sys.ulayout(i));
        let Af = assemble_matrix(&A, Some(&bilayout), Some(&uilayout), &blayout, &ulayout)?;
        let bf = assemble_vector(&b, Some(&bilayout), &blayout)?;

        let size0 = group_size(&sys.intmd_ulayout(0), &sys.ulayout(0));
        let size1 = group_size(&sys.intmd_ulayout(1), &sys.ulayout(1));
        let (p_start, p_size, s_start, s_size) = self.spans(size0, size1);

        let A11 = Self::extract_block(&Af, p_start, p_size, p_start, p_size)?;
        let A12 = Self::extract_block(&Af, p_start, p_size, s_start, s_size)?;
        let A21 = Self::extract_block(&Af, s_start, s_size, p_start, p_size)?;
        let A22 = Self::extract_block(&Af, s_start, s_size, s_start, s_size)?;

        let b1 = bf.base_narrow(0, p_start, p_size)?;
        let b2 = bf.base_narrow(0, s_start, s_size)?;

        // Factor the primary block once for both right-hand sides.
        let A11_inv_A12 = solve(&A11, &A12)?;
        let A11_inv_b1 = solve(&A11, &b1)?;

        let S = A22.sub(&mm(&A21, &A11_inv_A12)?)?;
        let rhs_schur = b2.sub(&mv(&A21, &A11_inv_b1)?)?;
        let u_schur = solve(&S, &rhs_schur)?;

        let rhs_primary = b1.sub(&mv(&A12, &u_schur)?)?;
        let u_primary = solve(&A11, &rhs_primary)?;

        let xf = if self.primary_group == 0 {
            base_cat(&[u_primary, u_schur], 0)?
        } else {
            base_cat(&[u_schur, u_primary], 0)?
        };

        Ok(disassemble_vector(&xf, Some(&uilayout), &ulayout)?
            .into_iter()
            .map(Some)
            .collect())
    }

    /// The implicit-function-theorem variant: returns `-du/dg` from the
    /// partitioned system and the auxiliary operator `B = dr/dg`.
    pub fn ift(&self, sys: &mut dyn NonlinearSystem) -> Result<TensorList> {
        self.check_groups(sys.n_ugroup(), sys.n_bgroup())?;

        let (A, B) = sys.A_and_B()?;

        let bilayout = flatten_grouped(sys.n_bgroup(), |i| sys.intmd_blayout(i));
        let uilayout = flatten_grouped(sys.n_ugroup(), |i| sys.intmd_ulayout(i));
        let gilayout = sys.intmd_glayout();
        let blayout = flatten_grouped(sys.n_bgroup(), |i| sys.blayout(i));
        let ulayout = flatten_grouped(sys.n_ugroup(), |i| sys.ulayout(i));
        let glayout = sys.glayout();
        let Af = assemble_matrix(&A, Some(&bilayout), Some(&uilayout), &blayout, &ulayout)?;
        let Bf = assemble_matrix(&B, Some(&bilayout), Some(&gilayout), &blayout, &glayout)?;

        let size0 = group_size(&sys.intmd_ulayout(0), &sys.ulayout(0));
        let size1 = group_size(&sys.intmd_ulayout(1), &sys.ulayout(1));
        let (p_start, p_size, s_start, s_size) = self.spans(size0, size1);

        let A11 = Self::extract_block(&Af, p_start, p_size, p_start, p_size)?;
        let A12 = Self::extract_block(&Af, p_start, p_size, s_start, s_size)?;
        let A21 = Self::extract_block(&Af, s_start, s_size, p_start, p_size)?;
        let A22 = Self::extract_block(&Af, s_start, s_size, s_start, s_size)?;

        let p = Bf.base_sizes()[1];
        let B1 = Self::extract_block(&Bf, p_start, p_size, 0, p)?;
        let B2 = Self::extract_block(&Bf, s_start, s_size, 0, p)?;

        let A11_inv_A12 = solve(&A11, &A12)?;
        let A11_inv_B1 = solve(&A11, &B1)?;

        let S = A22.sub(&mm(&A21, &A11_inv_A12)?)?;
        let RHS_schur = B2.sub(&mm(&A21, &A11_inv_B1)?)?;
        let X_schur = solve(&S, &RHS_schur)?;

        let RHS_primary = B1.sub(&mm(&A12, &X_schur)?)?;
        let X_primary = solve(&A11, &RHS_primary)?;

        // Differentiating r(u(g); g) = 0 gives A du/dg + B = 0, so the
        // assembled X = A^-1 B is exactly -du/dg.
        let Xf = if self.primary_group == 0 {
            base_cat(&[X_primary, X_schur], 0)?
        } else {
            base_cat(&[X_schur, X_primary], 0)?
        };

        // Disassemble the (row, column) blocks in row-major order.
        let mut blocks = TensorList::new();
        let mut row_at = 0;
        for (i, ubase) in ulayout.iter().enumerate() {
            let rsize = numel(&uilayout[i]) * numel(ubase);
            let mut col_at = 0;
            for (j, gbase) in glayout.iter().enumerate() {
                let csize = numel(&gilayout[j]) * numel(gbase);
                blocks.push(Some(
                    Xf.base_narrow(0, row_at, rsize)?
                        .base_narrow(1, col_at, csize)?,
                ));
                col_at += csize;
            }
            row_at += rsize;
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_same_group() {
        assert!(SchurComplement::new(0, 0).is_err());
        assert!(SchurComplement::new(0, 1).is_ok());
    }
}
