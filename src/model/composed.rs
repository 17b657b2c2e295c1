//! `composed` evaluates a directed graph of registered models as one
//! model.
//!
//! Submodels are evaluated in dependency order, with intermediate
//! variables flowing through variable references. Total first and
//! second derivatives with respect to the composed model's inputs are
//! obtained by walking the dependency graph in reverse and applying the
//! chain rule to the recorded partials.

use super::model::{Model, ModelBase, ModelRef};
use super::name::VariableName;
use super::resolver::DependencyResolver;
use crate::base::settings::Settings;
use crate::errors::Result;
use crate::tensor::{einsum, mm, Tensor};
use indexmap::IndexMap;

type TotalDerivs = IndexMap<VariableName, Tensor>;
type TotalSecDerivs = IndexMap<VariableName, IndexMap<VariableName, Tensor>>;

pub struct ComposedModel {
    base: ModelBase,
    resolver: DependencyResolver,
}

impl ComposedModel {
    pub fn new(
        name: impl Into<String>,
        settings: Settings,
        submodels: Vec<ModelRef>,
    ) -> Result<Self> {
        let mut base = ModelBase::with_settings(name, settings);
        base.set_defines(true, true, true);

        let resolver = DependencyResolver::new(&submodels)?;

        // Inbound variables of the graph become this model's inputs;
        // every submodel output is exposed on the output axis.
        for sub in &submodels {
            let sub_ref = sub.borrow();
            for (name, var) in sub_ref.base().input_store().iter() {
                if resolver.is_inbound(name) {
                    base.input_store_mut().clone_variable(var);
                }
            }
            for (_, var) in sub_ref.base().output_store().iter() {
                base.output_store_mut().clone_variable(var);
            }
        }

        for sub in submodels {
            base.register_model(sub, false)?;
        }

        Ok(ComposedModel { base, resolver })
    }

    fn add_to(map: &mut TotalDerivs, key: VariableName, value: Tensor) -> Result<()> {
        match map.get(&key) {
            Some(existing) => {
                let sum = existing.add(&value)?;
                map.insert(key, sum);
            }
            None => {
                map.insert(key, value);
            }
        }
        Ok(())
    }

    fn add_to_2(
        map: &mut TotalSecDerivs,
        k1: VariableName,
        k2: VariableName,
        value: Tensor,
    ) -> Result<()> {
        let row = map.entry(k1).or_insert_with(IndexMap::new);
        match row.get(&k2) {
            Some(existing) => {
                let sum = existing.add(&value)?;
                row.insert(k2, sum);
            }
            None => {
                row.insert(k2, value);
            }
        }
        Ok(())
    }

    /// Total first derivatives of a provided variable with respect to
    /// the inbound variables, summing over paths through the graph.
    fn total_derivatives(&self, model_idx: usize, vname: &VariableName) -> Result<TotalDerivs> {
        let yvar = {
            let sub = self.base.registered_models()[model_idx].borrow();
            sub.base().output_variable(vname)?
        };

        let mut derivs = TotalDerivs::new();
        for (uname, dy_du) in yvar.derivatives()? {
            if self.resolver.is_inbound(&uname) {
                Self::add_to(&mut derivs, uname, dy_du)?;
            } else if let Some(provider) = self.resolver.provider_of(&uname) {
                for (xname, du_dx) in self.total_derivatives(provider, &uname)? {
                    Self::add_to(&mut derivs, xname, mm(&dy_du, &du_dx)?)?;
                }
            }
        }
        Ok(derivs)
    }

    /// Total second derivatives, applying the bilinear chain rule with
    /// its four contributing terms plus the propagation of first
    /// derivatives through curved submodels.
    fn total_second_derivatives(
        &self,
        model_idx: usize,
        vname: &VariableName,
    ) -> Result<TotalSecDerivs> {
        let yvar = {
            let sub = self.base.registered_models()[model_idx].borrow();
            sub.base().output_variable(vname)?
        };

        let mut sec_derivs = TotalSecDerivs::new();
        for (u1name, u2name, d2y) in yvar.second_derivatives()? {
            let u1_in = self.resolver.is_inbound(&u1name);
            let u2_in = self.resolver.is_inbound(&u2name);

            if u1_in && u2_in {
                Self::add_to_2(&mut sec_derivs, u1name, u2name, d2y)?;
            } else if u1_in {
                let provider = self.provider_or_skip(&u2name);
                if let Some(provider) = provider {
                    for (x2name, du2_dx) in self.total_derivatives(provider, &u2name)? {
                        Self::add_to_2(
                            &mut sec_derivs,
                            u1name.clone(),
                            x2name,
                            einsum("...ijq,...qk", &[&d2y, &du2_dx])?,
                        )?;
                    }
                }
            } else if u2_in {
                let provider = self.provider_or_skip(&u1name);
                if let Some(provider) = provider {
                    for (x1name, du1_dx) in self.total_derivatives(provider, &u1name)? {
                        Self::add_to_2(
                            &mut sec_derivs,
                            x1name,
                            u2name.clone(),
                            einsum("...ipk,...pj", &[&d2y, &du1_dx])?,
                        )?;
                    }
                }
            } else {
                let p1 = self.provider_or_skip(&u1name);
                let p2 = self.provider_or_skip(&u2name);
                if let (Some(p1), Some(p2)) = (p1, p2) {
                    for (x1name, du1_dx) in self.total_derivatives(p1, &u1name)? {
                        for (x2name, du2_dx) in self.total_derivatives(p2, &u2name)? {
                            Self::add_to_2(
                                &mut sec_derivs,
                                x1name.clone(),
                                x2name,
                                einsum("...ipq,...pj,...qk", &[&d2y, &du1_dx, &du2_dx])?,
                            )?;
                        }
                    }
                }
            }
        }

        for (uname, dy_du) in yvar.derivatives()? {
            if self.resolver.is_inbound(&uname) {
                continue;
            }
            if let Some(provider) = self.resolver.provider_of(&uname) {
                for (x1name, row) in self.total_second_derivatives(provider, &uname)? {
                    for (x2name, d2u_dx) in row {
                        Self::add_to_2(
                            &mut sec_derivs,
                            x1name.clone(),
                            x2name,
                            einsum("...ip,...pjk", &[&dy_du, &d2u_dx])?,
                        )?;
                    }
                }
            }
        }

        Ok(sec_derivs)
    }

    fn provider_or_skip(&self, name: &VariableName) -> Option<usize> {
        self.resolver.provider_of(name)
    }
}

impl Model for ComposedModel {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModelBase {
        &mut self.base
    }

    fn setup(&mut self) -> Result<()> {
        if self.base.setup_done() {
            return Ok(());
        }

        // Wire each submodel input either to the providing submodel's
        // output or to this model's own input.
        let submodels = self.base.registered_models().to_vec();
        for sub in &submodels {
            let sub_ref = sub.borrow();
            for (name, var) in sub_ref.base().input_store().iter() {
                if !var.owning() {
                    continue;
                }
                if let Some(provider) = self.resolver.provider_of(name) {
                    let out = submodels[provider].borrow().base().output_variable(name)?;
                    var.set_reference(&out)?;
                } else {
                    var.set_reference(&self.base.input_variable(name)?)?;
                }
            }
        }

        // Expose submodel outputs through this model's output axis.
        for sub in &submodels {
            let sub_ref = sub.borrow();
            for (name, var) in sub_ref.base().output_store().iter() {
                self.base.output_variable(name)?.set_reference(var)?;
            }
        }

        self.base.input_store_mut().setup_axis()?;
        self.base.output_store_mut().setup_axis()?;
        self.base.mark_setup();
        Ok(())
    }

    fn set_value(&mut self, out: bool, dout: bool, d2out: bool) -> Result<()> {
        // Evaluate the registered models in dependency order; values
        // flow through the variable references.
        let order: Vec<usize> = self.resolver.order().to_vec();
        for i in order {
            let sub = self.base.registered_models()[i].clone();
            let mut sub = sub.borrow_mut();
            let sub_dout = (dout || d2out) && sub.base().defines_derivatives();
            let sub_d2out = d2out && sub.base().defines_second_derivatives();
            sub.forward_maybe_jit(out || dout || d2out, sub_dout, sub_d2out)?;
        }

        if !dout && !d2out {
            return Ok(());
        }

        // Walk the graph in reverse and accumulate total derivatives
        // onto this model's output variables.
        let outputs: Vec<VariableName> = self
            .base
            .output_store()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();

        for yname in outputs {
            let provider = match self.resolver.provider_of(&yname) {
                Some(provider) => provider,
                None => continue,
            };
            let yvar = self.base.output_variable(&yname)?;

            if dout || d2out {
                for (xname, total) in self.total_derivatives(provider, &yname)? {
                    let xvar = match self.base.input_variable(&xname) {
                        Ok(xvar) => xvar,
                        Err(_) => continue,
                    };
                    yvar.d_set_assembly(&xvar, total)?;
                }
            }

            if d2out {
                for (x1name, row) in self.total_second_derivatives(provider, &yname)? {
                    for (x2name, total) in row {
                        let x1 = self.base.input_variable(&x1name);
                        let x2 = self.base.input_variable(&x2name);
                        if let (Ok(x1), Ok(x2)) = (x1, x2) {
                            yvar.d2_set_assembly(&x1, &x2, total)?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
