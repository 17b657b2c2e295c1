//! `elasticity` relates elastic strain to stress through Hooke's law
//! for an isotropic material.

use crate::base::{Factory, OptionSet};
use crate::errors::Result;
use crate::model::{Model, ModelBase, ModelRef, Param, Var, VariableName};
use crate::tensor::primitives::{PrimitiveTensor, Scalar, SR2, SSR4};
use std::cell::RefCell;
use std::rc::Rc;

/// `S = C(E, nu) : Ee` with the isotropic stiffness assembled from the
/// Young's modulus and Poisson's ratio, both of which may be nonlinear
/// parameters.
pub struct LinearIsotropicElasticity {
    base: ModelBase,
    strain: Var,
    stress: Var,
    youngs_modulus: Param,
    poissons_ratio: Param,
}

impl LinearIsotropicElasticity {
    pub fn new(
        base_in: ModelBase,
        strain_name: VariableName,
        stress_name: VariableName,
        youngs_modulus: Param,
        poissons_ratio: Param,
    ) -> Result<Self> {
        let mut base = base_in;
        let strain = base.declare_input_variable::<SR2>(strain_name)?;
        let stress = base.declare_output_variable::<SR2>(stress_name)?;

        // The stress is linear in the strain, so that derivative is
        // written by hand; derivatives with respect to nonlinear
        // parameters go through the differentiation graph.
        if let Param::Nonlinear(e) = &youngs_modulus {
            let e = e.clone();
            base.request_ad(&stress, &e)?;
        }
        if let Param::Nonlinear(nu) = &poissons_ratio {
            let nu = nu.clone();
            base.request_ad(&stress, &nu)?;
        }

        Ok(LinearIsotropicElasticity {
            base,
            strain,
            stress,
            youngs_modulus,
            poissons_ratio,
        })
    }

    fn stiffness(&self) -> Result<SSR4> {
        let e = Scalar::from_tensor(self.youngs_modulus.value()?)?;
        let nu = Scalar::from_tensor(self.poissons_ratio.value()?)?;
        SSR4::isotropic_e_nu(&e, &nu)
    }
}

impl Model for LinearIsotropicElasticity {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModelBase {
        &mut self.base
    }

    fn set_value(&mut self, out: bool, dout: bool, _d2out: bool) -> Result<()> {
        let stiffness = self.stiffness()?;

        if out {
            let strain = SR2::from_tensor(self.strain.value()?)?;
            self.stress
                .set(stiffness.apply(&strain)?.into_tensor())?;
        }
        if dout {
            self.stress
                .d_assign(&self.strain, stiffness.into_tensor())?;
        }
        Ok(())
    }
}

pub(crate) fn ctor(name: &str, options: &OptionSet, factory: &mut Factory) -> Result<ModelRef> {
    let mut base = ModelBase::with_settings(name, factory.settings().clone());
    base.set_defines(true, true, true);
    let strain_name = VariableName::parse(&options.get_str_or("strain", "state.internal.Ee"));
    let stress_name = VariableName::parse(&options.get_str_or("stress", "state.S"));
    let youngs_modulus =
        super::resolve_scalar_parameter(&mut base, factory, options, "youngs_modulus")?;
    let poissons_ratio =
        super::resolve_scalar_parameter(&mut base, factory, options, "poissons_ratio")?;
    Ok(Rc::new(RefCell::new(LinearIsotropicElasticity::new(
        base,
        strain_name,
        stress_name,
        youngs_modulus,
        poissons_ratio,
    )?)))
}
