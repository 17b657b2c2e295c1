//! `model_system` wraps a model as the nonlinear system `r(u; g) = 0`.
//!
//! The maps are derived from the model's variable sub-axes: `state`
//! variables are the unknowns, `forces` are the given variables,
//! `old_state`/`old_forces` are their old-step counterparts, and the
//! `residual` output is the residual. The unknowns may be partitioned
//! into variable groups for partitioned solvers.

#![allow(non_snake_case)]

use super::linear::{LinearSystem, TensorList};
use super::nonlinear::NonlinearSystem;
use crate::errors::{MateriaError, Result};
use crate::model::{AssemblingNonlinearSystem, Model, ModelRef, VariableName};

pub struct ModelNonlinearSystem {
    model: ModelRef,
    assembly_guard: bool,

    umap: Vec<VariableName>,
    ulayout: Vec<Vec<usize>>,
    ugroups: Vec<(usize, usize)>,

    bmap: Vec<VariableName>,
    blayout: Vec<Vec<usize>>,
    bgroups: Vec<(usize, usize)>,

    gmap: Vec<VariableName>,
    glayout: Vec<Vec<usize>>,

    unmap: Vec<VariableName>,
    unlayout: Vec<Vec<usize>>,
    gnmap: Vec<VariableName>,
    gnlayout: Vec<Vec<usize>>,

    un_to_u: Vec<Option<usize>>,
    u_to_un: Vec<Option<usize>>,
    gn_to_g: Vec<Option<usize>>,
    g_to_gn: Vec<Option<usize>>,

    A_up_to_date: bool,
    b_up_to_date: bool,
}

fn position_map(from: &[VariableName], to: &[VariableName], old: bool) -> Vec<Option<usize>> {
    from.iter()
        .map(|name| {
            let counterpart = if old { name.current() } else { name.old() };
            counterpart
                .ok()
                .and_then(|c| to.iter().position(|t| *t == c))
        })
        .collect()
}

impl ModelNonlinearSystem {
    pub fn new(model: ModelRef, assembly_guard: bool) -> Result<Self> {
        let (umap, ulayout, gmap, glayout, unmap, unlayout, gnmap, gnlayout, bmap, blayout) = {
            let model_ref = model.borrow();
            let base = model_ref.base();

            let mut umap = Vec::new();
            let mut ulayout = Vec::new();
            let mut gmap = Vec::new();
            let mut glayout = Vec::new();
            let mut unmap = Vec::new();
            let mut unlayout = Vec::new();
            let mut gnmap = Vec::new();
            let mut gnlayout = Vec::new();
            for (name, var) in base.input_store().iter() {
                if name.is_state() {
                    umap.push(name.clone());
                    ulayout.push(var.base_sizes());
                } else if name.is_force() {
                    gmap.push(name.clone());
                    glayout.push(var.base_sizes());
                } else if name.is_old_state() {
                    unmap.push(name.clone());
                    unlayout.push(var.base_sizes());
                } else if name.is_old_force() {
                    gnmap.push(name.clone());
                    gnlayout.push(var.base_sizes());
                }
            }

            let mut bmap = Vec::new();
            let mut blayout = Vec::new();
            for (name, var) in base.output_store().iter() {
                if name.is_residual() {
                    bmap.push(name.clone());
                    blayout.push(var.base_sizes());
                }
            }

            (
                umap, ulayout, gmap, glayout, unmap, unlayout, gnmap, gnlayout, bmap, blayout,
            )
        };

        if umap.is_empty() || bmap.is_empty() {
            return Err(MateriaError::setup(
                "a model nonlinear system requires state input variables and residual output \
                 variables",
            ));
        }

        let un_to_u = position_map(&unmap, &umap, true);
        let u_to_un = position_map(&umap, &unmap, false);
        let gn_to_g = position_map(&gnmap, &gmap, true);
        let g_to_gn = position_map(&gmap, &gnmap, false);

        let nu = umap.len();
        let nb = bmap.len();
        Ok(ModelNonlinearSystem {
            model,
            assembly_guard,
            umap,
            ulayout,
            ugroups: vec![(0, nu)],
            bmap,
            blayout,
            bgroups: vec![(0, nb)],
            gmap,
            glayout,
            unmap,
            unlayout,
            gnmap,
            gnlayout,
            un_to_u,
            u_to_un,
            gn_to_g,
            g_to_gn,
            A_up_to_date: false,
            b_up_to_date: false,
        })
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    /// Partitions the unknowns into variable groups. The residual map
    /// is reordered to match: `state.X` pairs with `residual.X`.
    pub fn set_variable_groups(&mut self, groups: &[Vec<VariableName>]) -> Result<()> {
        let total: usize = groups.iter().map(|g| g.len()).sum();
        if total != self.umap.len() {
            return Err(MateriaError::unsupported(format!(
                "the variable groups cover {} unknowns, the system has {}",
                total,
                self.umap.len()
            )));
        }

        let mut new_umap = Vec::with_capacity(total);
        let mut new_ulayout = Vec::with_capacity(total);
        let mut new_bmap = Vec::with_capacity(total);
        let mut new_blayout = Vec::with_capacity(total);
        let mut ugroups = Vec::with_capacity(groups.len());

        for group in groups {
            let start = new_umap.len();
            for name in group {
                let i = self.umap.iter().position(|u| u == name).ok_or_else(|| {
                    MateriaError::unsupported(format!(
                        "'{}' is not an unknown of this system",
                        name
                    ))
                })?;
                let residual = name.remount(crate::model::name::RESIDUAL);
                let j = self.bmap.iter().position(|b| *b == residual).ok_or_else(|| {
                    MateriaError::unsupported(format!(
                        "unknown '{}' has no matching residual '{}'",
                        name, residual
                    ))
                })?;
                new_umap.push(self.umap[i].clone());
                new_ulayout.push(self.ulayout[i].clone());
                new_bmap.push(self.bmap[j].clone());
                new_blayout.push(self.blayout[j].clone());
            }
            ugroups.push((start, group.len()));
        }

        if new_umap.len() != self.umap.len() || new_bmap.len() != self.bmap.len() {
            return Err(MateriaError::unsupported(
                "the variable groups must partition the unknowns",
            ));
        }

        self.umap = new_umap;
        self.ulayout = new_ulayout;
        self.bmap = new_bmap;
        self.blayout = new_blayout;
        self.bgroups = ugroups.clone();
        self.ugroups = ugroups;
        self.un_to_u = position_map(&self.unmap, &self.umap, true);
        self.u_to_un = position_map(&self.umap, &self.unmap, false);
        Ok(())
    }

    pub fn unmap(&self) -> &[VariableName] {
        &self.unmap
    }

    pub fn unlayout(&self) -> &[Vec<usize>] {
        &self.unlayout
    }

    pub fn gnmap(&self) -> &[VariableName] {
        &self.gnmap
    }

    pub fn gnlayout(&self) -> &[Vec<usize>] {
        &self.gnlayout
    }

    pub fn un_to_u(&self) -> &[Option<usize>] {
        &self.un_to_u
    }

    pub fn u_to_un(&self) -> &[Option<usize>] {
        &self.u_to_un
    }

    pub fn gn_to_g(&self) -> &[Option<usize>] {
        &self.gn_to_g
    }

    pub fn g_to_gn(&self) -> &[Option<usize>] {
        &self.g_to_gn
    }

    fn group_slice<'a, T>(items: &'a [T], groups: &[(usize, usize)], group: usize) -> &'a [T] {
        let (start, len) = groups[group];
        &items[start..start + len]
    }

    fn intmd_layout_of(&self, names: &[VariableName], input: bool) -> Vec<Vec<usize>> {
        let model = self.model.borrow();
        names
            .iter()
            .map(|name| {
                let var = if input {
                    model.base().input_variable(name)
                } else {
                    model.base().output_variable(name)
                };
                var.map(|v| v.intmd_sizes()).unwrap_or_default()
            })
            .collect()
    }

    /// Evaluates the model for whatever is stale, inside the assembly
    /// guard.
    fn evaluate(&mut self, want_A: bool, want_b: bool) -> Result<()> {
        let need_b = want_b && !self.b_up_to_date;
        let need_A = want_A && !self.A_up_to_date;
        if !need_b && !need_A {
            return Ok(());
        }

        {
            let _guard = AssemblingNonlinearSystem::new(self.assembly_guard);
            let mut model = self.model.borrow_mut();
            model.zero_undefined_input()?;
            model.forward_maybe_jit(want_b, want_A, false)?;
        }

        // The forward operator clears everything it did not recompute.
        self.b_up_to_date = want_b;
        self.A_up_to_date = want_A;
        Ok(())
    }

    /// Collects `b = -r` in map order.
    fn collect_b(&self) -> Result<TensorList> {
        let model = self.model.borrow();
        let mut b = TensorList::with_capacity(self.bmap.len());
        for name in &self.bmap {
            let var = model.base().output_variable(name)?;
            b.push(if var.defined() {
                Some(var.value()?.neg())
            } else {
                None
            });
        }
        Ok(b)
    }

    /// Collects a row-major block operator `d(residual)/d(columns)`.
    fn collect_operator(&self, columns: &[VariableName]) -> Result<TensorList> {
        let model = self.model.borrow();
        let mut blocks = TensorList::with_capacity(self.bmap.len() * columns.len());
        for rname in &self.bmap {
            let var = model.base().output_variable(rname)?;
            for cname in columns {
                blocks.push(var.derivative_assembly(cname)?);
            }
        }
        Ok(blocks)
    }
}

impl LinearSystem for ModelNonlinearSystem {
    fn n_ugroup(&self) -> usize {
        self.ugroups.len()
    }

    fn n_bgroup(&self) -> usize {
        self.bgroups.len()
    }

    fn umap(&self, group: usize) -> Vec<VariableName> {
        Self::group_slice(&self.umap, &self.ugroups, group).to_vec()
    }

    fn intmd_ulayout(&self, group: usize) -> Vec<Vec<usize>> {
        self.intmd_layout_of(Self::group_slice(&self.umap, &self.ugroups, group), true)
    }

    fn ulayout(&self, group: usize) -> Vec<Vec<usize>> {
        Self::group_slice(&self.ulayout, &self.ugroups, group).to_vec()
    }

    fn bmap(&self, group: usize) -> Vec<VariableName> {
        Self::group_slice(&self.bmap, &self.bgroups, group).to_vec()
    }

    fn intmd_blayout(&self, group: usize) -> Vec<Vec<usize>> {
        self.intmd_layout_of(Self::group_slice(&self.bmap, &self.bgroups, group), false)
    }

    fn blayout(&self, group: usize) -> Vec<Vec<usize>> {
        Self::group_slice(&self.blayout, &self.bgroups, group).to_vec()
    }

    fn set_u(&mut self, u: TensorList) -> Result<()> {
        self.model
            .borrow()
            .base()
            .input_store()
            .assign_named(&self.umap, &u)?;
        self.A_up_to_date = false;
        self.b_up_to_date = false;
        Ok(())
    }

    fn u(&self) -> Result<TensorList> {
        self.model
            .borrow()
            .base()
            .input_store()
            .collect_named(&self.umap)
    }

    fn A(&mut self) -> Result<TensorList> {
        self.evaluate(true, false)?;
        self.collect_operator(&self.umap)
    }

    fn b(&mut self) -> Result<TensorList> {
        self.evaluate(false, true)?;
        self.collect_b()
    }

    fn A_and_b(&mut self) -> Result<(TensorList, TensorList)> {
        self.evaluate(true, true)?;
        Ok((self.collect_operator(&self.umap)?, self.collect_b()?))
    }

    fn A_and_B(&mut self) -> Result<(TensorList, TensorList)> {
        self.evaluate(true, false)?;
        Ok((
            self.collect_operator(&self.umap)?,
            self.collect_operator(&self.gmap)?,
        ))
    }
}

impl NonlinearSystem for ModelNonlinearSystem {
    fn set_g(&mut self, g: TensorList) -> Result<()> {
        self.model
            .borrow()
            .base()
            .input_store()
            .assign_named(&self.gmap, &g)?;
        self.A_up_to_date = false;
        self.b_up_to_date = false;
        Ok(())
    }

    fn g(&self) -> Result<TensorList> {
        self.model
            .borrow()
            .base()
            .input_store()
            .collect_named(&self.gmap)
    }

    fn gmap(&self) -> Vec<VariableName> {
        self.gmap.clone()
    }

    fn intmd_glayout(&self) -> Vec<Vec<usize>> {
        self.intmd_layout_of(&self.gmap, true)
    }

    fn glayout(&self) -> Vec<Vec<usize>> {
        self.glayout.clone()
    }

    fn A_and_B_and_b(&mut self) -> Result<(TensorList, TensorList, TensorList)> {
        self.evaluate(true, true)?;
        Ok((
            self.collect_operator(&self.umap)?,
            self.collect_operator(&self.gmap)?,
            self.collect_b()?,
        ))
    }

    fn set_un(&mut self, un: TensorList) -> Result<()> {
        self.model
            .borrow()
            .base()
            .input_store()
            .assign_named(&self.unmap, &un)?;
        self.A_up_to_date = false;
        self.b_up_to_date = false;
        Ok(())
    }

    fn un(&self) -> Result<TensorList> {
        self.model
            .borrow()
            .base()
            .input_store()
            .collect_named(&self.unmap)
    }

    fn set_gn(&mut self, gn: TensorList) -> Result<()> {
        self.model
            .borrow()
            .base()
            .input_store()
            .assign_named(&self.gnmap, &gn)?;
        self.A_up_to_date = false;
        self.b_up_to_date = false;
        Ok(())
    }

    fn gn(&self) -> Result<TensorList> {
        self.model
            .borrow()
            .base()
            .input_store()
            .collect_named(&self.gnmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_maps() {
        let u = vec![
            VariableName::parse("state.a"),
            VariableName::parse("state.b"),
        ];
        let un = vec![VariableName::parse("old_state.b")];
        assert_eq!(position_map(&un, &u, true), vec![Some(1)]);
        assert_eq!(position_map(&u, &un, false), vec![None, Some(0)]);
    }
}
