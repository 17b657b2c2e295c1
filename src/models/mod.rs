//! `models` is the small library of concrete models shipped with the
//! crate: parameter providers, scalar arithmetic, linear isotropic
//! elasticity, and simple implicit residuals. Everything else is meant
//! to be implemented downstream against the [`crate::model::Model`]
//! trait.

pub mod elasticity;
pub mod parameters;
pub mod residuals;
pub mod scalar_ops;

use crate::base::{Factory, OptionSet, Registry};
use crate::errors::{MateriaError, Result};
use crate::model::{ComposedModel, Model, ModelBase, ModelRef, Param, VariableName};
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Rc;

pub use elasticity::LinearIsotropicElasticity;
pub use parameters::ScalarConstantParameter;
pub use residuals::ScalarSquareResidual;
pub use scalar_ops::{ScalarLinearCombination, ScalarOffset, SR2Trace};

/// Registers every built-in model type.
pub fn register_builtins(registry: &mut Registry) {
    registry.register("ScalarConstantParameter", parameters::ctor);
    registry.register("ScalarOffset", scalar_ops::offset_ctor);
    registry.register("ScalarLinearCombination", scalar_ops::combination_ctor);
    registry.register("SR2Trace", scalar_ops::trace_ctor);
    registry.register("LinearIsotropicElasticity", elasticity::ctor);
    registry.register("ScalarSquareResidual", residuals::ctor);
    registry.register("ComposedModel", composed_ctor);
}

fn composed_ctor(name: &str, options: &OptionSet, factory: &mut Factory) -> Result<ModelRef> {
    let submodel_names = options.get_str_list("models")?;
    let mut submodels = Vec::with_capacity(submodel_names.len());
    for submodel in &submodel_names {
        submodels.push(factory.get_model(submodel)?);
    }
    let model = ComposedModel::new(name, factory.settings().clone(), submodels)?;
    Ok(Rc::new(RefCell::new(model)))
}

/// Resolves a scalar parameter option: a numeric literal declares a
/// literal parameter; anything else is taken as the name of a model
/// providing the value as a nonlinear parameter.
pub fn resolve_scalar_parameter(
    base: &mut ModelBase,
    factory: &mut Factory,
    options: &OptionSet,
    pname: &str,
) -> Result<Param> {
    let raw = options.get_str(pname)?;
    if let Ok(value) = raw.parse::<f64>() {
        return base.declare_parameter(pname, Tensor::scalar(value));
    }

    let provider = factory.get_model(raw)?;
    let provider_var = sole_output_variable(&provider)?;
    base.declare_nonlinear_parameter(pname, provider, provider_var)
}

/// The single output variable of a parameter-providing model.
fn sole_output_variable(model: &ModelRef) -> Result<VariableName> {
    let model = model.borrow();
    let mut names = model.base().output_store().iter().map(|(name, _)| name);
    let first = names.next().cloned().ok_or_else(|| {
        MateriaError::setup(format!(
            "model '{}' provides no output variable to bind as a nonlinear parameter",
            model.base().name()
        ))
    })?;
    if names.next().is_some() {
        return Err(MateriaError::setup(format!(
            "model '{}' provides more than one output variable; cannot bind it as a \
             nonlinear parameter",
            model.base().name()
        )));
    }
    Ok(first)
}
