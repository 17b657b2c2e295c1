//! `residuals` provides simple implicit residual definitions for
//! nonlinear-system tests and examples.

use crate::base::{Factory, OptionSet};
use crate::errors::Result;
use crate::model::{Model, ModelBase, ModelRef, Var, VariableName};
use crate::tensor::primitives::Scalar;
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Rc;

/// `r = u^2 - f`, with both derivatives computed by automatic
/// differentiation.
pub struct ScalarSquareResidual {
    base: ModelBase,
    u: Var,
    f: Var,
    r: Var,
}

impl ScalarSquareResidual {
    pub fn new(
        base_in: ModelBase,
        variable: VariableName,
        force: VariableName,
        residual: VariableName,
    ) -> Result<Self> {
        let mut base = base_in;
        let u = base.declare_input_variable::<Scalar>(variable)?;
        let f = base.declare_input_variable::<Scalar>(force)?;
        let r = base.declare_output_variable::<Scalar>(residual)?;

        base.request_ad(&r, &u)?;
        base.request_ad_second(&r, &u, &u)?;

        Ok(ScalarSquareResidual { base, u, f, r })
    }
}

impl Model for ScalarSquareResidual {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModelBase {
        &mut self.base
    }

    fn set_value(&mut self, out: bool, dout: bool, _d2out: bool) -> Result<()> {
        if out {
            let u = self.u.value()?;
            let f = self.f.value()?;
            self.r.set(u.mul(&u)?.sub(&f)?)?;
        }
        if dout {
            // d r / d u comes from the differentiation graph; the
            // forcing term enters linearly.
            self.r.d_assign(&self.f, Tensor::scalar(-1.0))?;
        }
        Ok(())
    }
}

pub(crate) fn ctor(name: &str, options: &OptionSet, factory: &mut Factory) -> Result<ModelRef> {
    let mut base = ModelBase::with_settings(name, factory.settings().clone());
    base.set_defines(true, true, true);
    let variable = VariableName::parse(&options.get_str_or("variable", "state.x"));
    let force = VariableName::parse(&options.get_str_or("force", "forces.f"));
    let residual = VariableName::parse(&options.get_str_or("residual", "residual.x"));
    Ok(Rc::new(RefCell::new(ScalarSquareResidual::new(
        base, variable, force, residual,
    )?)))
}
