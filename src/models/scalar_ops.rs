//! `scalar_ops` provides the scalar arithmetic models: offset, linear
//! combination, and the trace of a symmetric second order tensor.

use crate::base::{Factory, OptionSet};
use crate::errors::{MateriaError, Result};
use crate::model::{Model, ModelBase, ModelRef, Param, Var, VariableName};
use crate::tensor::primitives::{PrimitiveTensor, Scalar, SR2};
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Rc;

/// `y = x + c`, with `c` a (possibly nonlinear) scalar parameter.
pub struct ScalarOffset {
    base: ModelBase,
    x: Var,
    y: Var,
    offset: Param,
}

impl ScalarOffset {
    pub fn new(
        base_in: ModelBase,
        x_name: VariableName,
        y_name: VariableName,
        offset: Param,
    ) -> Result<Self> {
        let mut base = base_in;
        let x = if base.input_store().has(&x_name) {
            base.input_variable(&x_name)?
        } else {
            base.declare_input_variable::<Scalar>(x_name)?
        };
        let y = base.declare_output_variable::<Scalar>(y_name)?;
        Ok(ScalarOffset {
            base,
            x,
            y,
            offset,
        })
    }
}

impl Model for ScalarOffset {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModelBase {
        &mut self.base
    }

    fn set_value(&mut self, out: bool, dout: bool, _d2out: bool) -> Result<()> {
        if out {
            let x = self.x.value()?;
            let c = self.offset.value()?;
            self.y.set(x.add(&c)?)?;
        }
        if dout {
            self.y.d_assign(&self.x, Tensor::scalar(1.0))?;
            if let Param::Nonlinear(c) = &self.offset {
                self.y.d_assign(c, Tensor::scalar(1.0))?;
            }
        }
        Ok(())
    }
}

pub(crate) fn offset_ctor(
    name: &str,
    options: &OptionSet,
    factory: &mut Factory,
) -> Result<ModelRef> {
    let mut base = ModelBase::with_settings(name, factory.settings().clone());
    base.set_defines(true, true, true);
    let x_name = VariableName::parse(&options.get_str_or("x", "forces.x"));
    let y_name = VariableName::parse(&options.get_str_or("y", "state.y"));
    let offset = super::resolve_scalar_parameter(&mut base, factory, options, "offset")?;
    Ok(Rc::new(RefCell::new(ScalarOffset::new(
        base, x_name, y_name, offset,
    )?)))
}

/// `y = sum_i c_i x_i` over a list of scalar variables.
pub struct ScalarLinearCombination {
    base: ModelBase,
    from: Vec<Var>,
    to: Var,
    coefficients: Vec<f64>,
}

impl ScalarLinearCombination {
    pub fn new(
        base_in: ModelBase,
        from_names: Vec<VariableName>,
        to_name: VariableName,
        coefficients: Vec<f64>,
    ) -> Result<Self> {
        if from_names.len() != coefficients.len() {
            return Err(MateriaError::setup(format!(
                "{} coefficients were given for {} variables",
                coefficients.len(),
                from_names.len()
            )));
        }
        let mut base = base_in;
        let mut from = Vec::with_capacity(from_names.len());
        for name in from_names {
            from.push(if base.input_store().has(&name) {
                base.input_variable(&name)?
            } else {
                base.declare_input_variable::<Scalar>(name)?
            });
        }
        let to = base.declare_output_variable::<Scalar>(to_name)?;
        Ok(ScalarLinearCombination {
            base,
            from,
            to,
            coefficients,
        })
    }
}

impl Model for ScalarLinearCombination {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModelBase {
        &mut self.base
    }

    fn set_value(&mut self, out: bool, dout: bool, _d2out: bool) -> Result<()> {
        if out {
            let mut sum = Tensor::scalar(0.0);
            for (x, c) in self.from.iter().zip(&self.coefficients) {
                sum = sum.add(&x.value()?.mul_scalar(*c))?;
            }
            self.to.set(sum)?;
        }
        if dout {
            for (x, c) in self.from.iter().zip(&self.coefficients) {
                self.to.d_assign(x, Tensor::scalar(*c))?;
            }
        }
        Ok(())
    }
}

pub(crate) fn combination_ctor(
    name: &str,
    options: &OptionSet,
    factory: &mut Factory,
) -> Result<ModelRef> {
    let mut base = ModelBase::with_settings(name, factory.settings().clone());
    base.set_defines(true, true, true);
    let from_names: Vec<VariableName> = options
        .get_str_list("from_var")?
        .iter()
        .map(|s| VariableName::parse(s))
        .collect();
    let to_name = VariableName::parse(options.get_str("to_var")?);
    let coefficients = if options.contains("coefficients") {
        options.get_real_list("coefficients")?
    } else {
        vec![1.0; from_names.len()]
    };
    Ok(Rc::new(RefCell::new(ScalarLinearCombination::new(
        base,
        from_names,
        to_name,
        coefficients,
    )?)))
}

/// The trace of a symmetric second order tensor.
pub struct SR2Trace {
    base: ModelBase,
    tensor: Var,
    to: Var,
}

impl SR2Trace {
    pub fn new(base_in: ModelBase, tensor_name: VariableName, to_name: VariableName) -> Result<Self> {
        let mut base = base_in;
        let tensor = base.declare_input_variable::<SR2>(tensor_name)?;
        let to = base.declare_output_variable::<Scalar>(to_name)?;
        Ok(SR2Trace { base, tensor, to })
    }
}

impl Model for SR2Trace {
    fn base(&self) -> &ModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ModelBase {
        &mut self.base
    }

    fn set_value(&mut self, out: bool, dout: bool, _d2out: bool) -> Result<()> {
        if out {
            let s = SR2::from_tensor(self.tensor.value()?)?;
            self.to.set(s.tr()?.into_tensor())?;
        }
        if dout {
            self.to
                .d_assign(&self.tensor, SR2::identity().into_tensor())?;
        }
        Ok(())
    }
}

pub(crate) fn trace_ctor(
    name: &str,
    options: &OptionSet,
    factory: &mut Factory,
) -> Result<ModelRef> {
    let mut base = ModelBase::with_settings(name, factory.settings().clone());
    base.set_defines(true, true, true);
    let tensor_name = VariableName::parse(options.get_str("tensor")?);
    let to_name = VariableName::parse(options.get_str("to_var")?);
    Ok(Rc::new(RefCell::new(SR2Trace::new(
        base,
        tensor_name,
        to_name,
    )?)))
}
