//! `parameters` provides parameter-valued models, the providers behind
//! nonlinear parameters.

use crate::base::{Factory, OptionSet};
use crate::errors::Result;
use crate::model::name::PARAMETERS;
use crate::model::{Model, ModelBase, ModelRef, Param, Var, VariableName};
use crate::tensor::primitives::Scalar;
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Rc;

/// A constant scalar exposed as an output variable on the `parameters`
/// sub-axis, so other models can couple to it.
pub struct ScalarConstantParameter {
    base: ModelBase,
    value: Param,
    out: Var,
}

impl ScalarConstantParameter {
    pub fn new(base_in: ModelBase, value: f64) -> Result<Self> {
        let mut base = base_in;
        let out_name = VariableName::parse(PARAMETERS).with_suffix(base.name());
        let out = base.declare_output_variable::<Scalar>(out_name)?;
        let value = base.declare_parameter("value", Tensor::scalar(value))?;
        Ok(ScalarConstantParameter { base, value, out })
    }
}

impl Model for ScalarConstantParameter {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModelBase {
        &mut self.base
    }

    fn set_value(&mut self, out: bool, _dout: bool, _d2out: bool) -> Result<()> {
        if out {
            self.out.set(self.value.value()?)?;
        }
        Ok(())
    }
}

pub(crate) fn ctor(name: &str, options: &OptionSet, factory: &mut Factory) -> Result<ModelRef> {
    let base = ModelBase::with_settings(name, factory.settings().clone());
    let value = options.get_real("value")?;
    Ok(Rc::new(RefCell::new(ScalarConstantParameter::new(
        base, value,
    )?)))
}
